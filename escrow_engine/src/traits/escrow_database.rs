use crate::traits::{
    AnnouncementManagement,
    BookingManagement,
    CatalogManagement,
    LedgerError,
    LedgerManagement,
    ProcessedEventLog,
};

/// The highest level of behaviour a storage backend must provide to run the escrow engine.
#[allow(async_fn_in_trait)]
pub trait EscrowDatabase:
    Clone + LedgerManagement + BookingManagement + AnnouncementManagement + CatalogManagement + ProcessedEventLog
{
    /// The URL of the database
    fn url(&self) -> &str;

    /// Closes the database connection.
    async fn close(&mut self) -> Result<(), LedgerError> {
        Ok(())
    }
}
