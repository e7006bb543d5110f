use crate::{
    db_types::{Package, PackageId, Travel, TravelId, UserId},
    traits::BookingError,
};

/// The local read model of travels and packages, kept in sync by the listing service.
#[allow(async_fn_in_trait)]
pub trait CatalogManagement {
    async fn upsert_travel(&self, id: &TravelId, user: &UserId) -> Result<Travel, BookingError>;

    async fn upsert_package(&self, id: &PackageId, user: &UserId) -> Result<Package, BookingError>;

    async fn fetch_travel(&self, id: &TravelId) -> Result<Option<Travel>, BookingError>;

    async fn fetch_package(&self, id: &PackageId) -> Result<Option<Package>, BookingError>;
}
