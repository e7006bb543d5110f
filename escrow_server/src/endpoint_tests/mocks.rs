use escrow_engine::traits::{
    ChargeRequest,
    PaymentProvider,
    PayoutRequest,
    ProviderCharge,
    ProviderError,
    ProviderPayout,
};
use mockall::mock;

mock! {
    pub Provider {}
    impl Clone for Provider {
        fn clone(&self) -> Self;
    }
    impl PaymentProvider for Provider {
        async fn create_charge(&self, request: ChargeRequest) -> Result<ProviderCharge, ProviderError>;
        async fn retrieve_charge(&self, id: &str) -> Result<ProviderCharge, ProviderError>;
        async fn create_payout(&self, request: PayoutRequest) -> Result<ProviderPayout, ProviderError>;
    }
}

/// A provider that cannot be reached. Every copy of it behaves the same way.
pub fn unreachable_provider() -> MockProvider {
    let mut provider = MockProvider::new();
    provider.expect_clone().returning(unreachable_provider);
    provider.expect_create_charge().returning(|_| Err(ProviderError::Unavailable("connection reset by peer".into())));
    provider.expect_retrieve_charge().returning(|_| Err(ProviderError::Unavailable("connection reset by peer".into())));
    provider.expect_create_payout().returning(|_| Err(ProviderError::Unavailable("connection reset by peer".into())));
    provider
}
