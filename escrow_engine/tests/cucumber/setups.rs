use cucumber::given;
use escrow_engine::{
    booking_objects::NewBookingRequest,
    db_types::{Amount, PackageId, TravelId, UserId},
    CatalogManagement,
};

use crate::cucumber::{EscrowSystem, EscrowWorld};

#[given("a fresh install")]
async fn fresh_database(world: &mut EscrowWorld) {
    let system = EscrowSystem::new().await;
    world.system = Some(system);
}

#[given(expr = "'{word}' has {int} in their wallet")]
async fn wallet_balance(world: &mut EscrowWorld, user: String, amount: i64) {
    let sys = world.system();
    let user = UserId::new(user);
    let intent = sys.wallets.deposit(&user, Amount::from(amount)).await.expect("Error starting deposit");
    sys.wallets.confirm_deposit(intent.transaction.id).await.expect("Error confirming deposit");
}

#[given(expr = "'{word}' books a package with traveler '{word}' for {int} as booking {word}")]
async fn create_booking(world: &mut EscrowWorld, owner: String, traveler: String, amount: i64, name: String) {
    let sys = world.system();
    let travel = TravelId::new(format!("travel-{name}"));
    let package = PackageId::new(format!("package-{name}"));
    sys.db.upsert_travel(&travel, &UserId::new(traveler)).await.expect("Error creating travel");
    sys.db.upsert_package(&package, &UserId::new(owner.as_str())).await.expect("Error creating package");
    let request = NewBookingRequest { travel_id: travel, package_id: package, amount: Amount::from(amount) };
    let booking = sys.bookings.create_booking(&UserId::new(owner), request).await.expect("Error creating booking");
    world.system_mut().named_bookings.insert(name, booking.id);
}
