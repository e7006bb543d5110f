mod bookings;
mod helpers;
mod mocks;
mod wallet;
mod webhooks;
