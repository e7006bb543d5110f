use std::collections::HashMap;

use cucumber::World;
use escrow_engine::{
    db_types::{Amount, Booking, BookingId, EscrowWallet},
    events::EventProducers,
    ledger_objects::LedgerPolicy,
    test_utils::{create_database, random_db_path, run_migrations, FakePaymentProvider},
    AnnouncementApi,
    BookingFlowApi,
    LedgerManagement,
    ReconciliationApi,
    SqliteDatabase,
    WalletApi,
};
use log::*;

#[derive(Default, Debug, World)]
pub struct EscrowWorld {
    pub system: Option<EscrowSystem>,
}

#[derive(Debug)]
pub struct EscrowSystem {
    pub db_path: String,
    pub db: SqliteDatabase,
    pub provider: FakePaymentProvider,
    pub escrow: EscrowWallet,
    pub wallets: WalletApi<SqliteDatabase, FakePaymentProvider>,
    pub bookings: BookingFlowApi<SqliteDatabase, FakePaymentProvider>,
    pub announcements: AnnouncementApi<SqliteDatabase>,
    pub reconciliation: ReconciliationApi<SqliteDatabase, FakePaymentProvider>,
    /// Bookings by the name the feature file gave them.
    pub named_bookings: HashMap<String, BookingId>,
    pub last_error: Option<String>,
}

impl EscrowWorld {
    pub fn system(&self) -> &EscrowSystem {
        self.system.as_ref().expect("Escrow system not initialised")
    }

    pub fn system_mut(&mut self) -> &mut EscrowSystem {
        self.system.as_mut().expect("Escrow system not initialised")
    }
}

impl EscrowSystem {
    pub async fn new() -> Self {
        let db_path = prepare_test_env().await;
        let db = SqliteDatabase::new_with_url(&db_path, 5).await.expect("Error creating connection to database");
        debug!("Created database: {db_path}");
        let escrow = db.escrow_wallet("EUR").await.expect("Error creating escrow wallet");
        let provider = FakePaymentProvider::new();
        // Scenarios work with small amounts, so the deployment minimums are lifted.
        let policy = LedgerPolicy { min_deposit: Amount::from(1), min_withdraw: Amount::from(1), ..Default::default() };
        let producers = EventProducers::default();
        let wallets = WalletApi::new(db.clone(), provider.clone(), escrow.clone(), policy);
        let bookings = BookingFlowApi::new(db.clone(), provider.clone(), escrow.clone(), producers.clone());
        let announcements = AnnouncementApi::new(db.clone(), escrow.clone(), producers.clone());
        let reconciliation = ReconciliationApi::new(db.clone(), bookings.clone(), producers);
        Self {
            db_path,
            db,
            provider,
            escrow,
            wallets,
            bookings,
            announcements,
            reconciliation,
            named_bookings: HashMap::new(),
            last_error: None,
        }
    }

    pub fn booking_id(&self, name: &str) -> BookingId {
        *self.named_bookings.get(name).unwrap_or_else(|| panic!("No booking called {name}"))
    }

    pub async fn booking(&self, name: &str) -> Booking {
        let id = self.booking_id(name);
        escrow_engine::BookingManagement::fetch_booking(&self.db, id)
            .await
            .expect("Error fetching booking")
            .expect("Booking does not exist")
    }
}

pub async fn prepare_test_env() -> String {
    let path = random_db_path();
    create_database(&path).await;
    run_migrations(&path).await;
    path
}
