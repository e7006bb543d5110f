#![allow(dead_code)]

use escrow_engine::{
    booking_objects::NewBookingRequest,
    db_types::{Amount, Booking, EscrowWallet, PackageId, TravelId, UserId, Wallet},
    events::EventProducers,
    ledger_objects::LedgerPolicy,
    test_utils::{prepare_test_env, random_db_path, FakePaymentProvider},
    traits::{FundingOutcome, FundingSource},
    AnnouncementApi,
    BookingFlowApi,
    CatalogManagement,
    LedgerManagement,
    ReconciliationApi,
    SqliteDatabase,
    WalletApi,
};

pub struct TestSystem {
    pub db_path: String,
    pub db: SqliteDatabase,
    pub provider: FakePaymentProvider,
    pub escrow: EscrowWallet,
    pub wallets: WalletApi<SqliteDatabase, FakePaymentProvider>,
    pub bookings: BookingFlowApi<SqliteDatabase, FakePaymentProvider>,
    pub announcements: AnnouncementApi<SqliteDatabase>,
    pub reconciliation: ReconciliationApi<SqliteDatabase, FakePaymentProvider>,
}

impl TestSystem {
    pub async fn new() -> Self {
        Self::with_producers(EventProducers::default()).await
    }

    pub async fn with_producers(producers: EventProducers) -> Self {
        let db_path = random_db_path();
        prepare_test_env(&db_path).await;
        let db = SqliteDatabase::new_with_url(&db_path, 10).await.expect("Error creating connection to database");
        let escrow = db.escrow_wallet("EUR").await.expect("Error fetching escrow wallet");
        let provider = FakePaymentProvider::new();
        let wallets = WalletApi::new(db.clone(), provider.clone(), escrow.clone(), LedgerPolicy::default());
        let bookings = BookingFlowApi::new(db.clone(), provider.clone(), escrow.clone(), producers.clone());
        let announcements = AnnouncementApi::new(db.clone(), escrow.clone(), producers.clone());
        let reconciliation = ReconciliationApi::new(db.clone(), bookings.clone(), producers);
        Self { db_path, db, provider, escrow, wallets, bookings, announcements, reconciliation }
    }

    /// Deposits `amount` into the user's wallet through the provider and confirms it.
    pub async fn fund_wallet(&self, user: &str, amount: i64) -> Wallet {
        let user = UserId::new(user);
        let intent = self.wallets.deposit(&user, Amount::from(amount)).await.expect("Error starting deposit");
        self.wallets.confirm_deposit(intent.transaction.id).await.expect("Error confirming deposit");
        self.wallets.wallet_for_user(&user).await.expect("Error fetching wallet")
    }

    pub async fn balance(&self, user: &str) -> Amount {
        self.wallets.wallet_for_user(&UserId::new(user)).await.expect("Error fetching wallet").balance
    }

    pub async fn escrow_balance(&self) -> Amount {
        self.db.fetch_wallet(self.escrow.id()).await.expect("Error fetching escrow").expect("No escrow wallet").balance
    }

    /// Registers a travel for `traveler` and a package for `owner`, and books one onto the other.
    pub async fn book(&self, owner: &str, traveler: &str, amount: i64) -> Booking {
        let n = rand::random::<u32>();
        let travel = TravelId::new(format!("travel-{n}"));
        let package = PackageId::new(format!("package-{n}"));
        self.db.upsert_travel(&travel, &UserId::new(traveler)).await.expect("Error creating travel");
        self.db.upsert_package(&package, &UserId::new(owner)).await.expect("Error creating package");
        let request = NewBookingRequest { travel_id: travel, package_id: package, amount: Amount::from(amount) };
        self.bookings.create_booking(&UserId::new(owner), request).await.expect("Error creating booking")
    }

    /// A booking that the owner has paid for from their wallet, waiting for the traveler.
    pub async fn funded_booking(&self, owner: &str, traveler: &str, amount: i64) -> Booking {
        self.fund_wallet(owner, amount).await;
        let booking = self.book(owner, traveler, amount).await;
        match self.bookings.fund(booking.id, FundingSource::Wallet).await.expect("Error funding booking") {
            FundingOutcome::Funded(funded) => funded.booking,
            other => panic!("Booking was not funded: {other:?}"),
        }
    }
}
