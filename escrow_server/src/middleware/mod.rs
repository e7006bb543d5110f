mod ip_whitelist;
mod webhook_signature;

pub use ip_whitelist::{IpWhitelistMiddlewareFactory, IpWhitelistMiddlewareService};
pub use webhook_signature::{WebhookSignatureMiddlewareFactory, WebhookSignatureMiddlewareService};
