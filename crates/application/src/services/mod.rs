mod account_purge_service;
mod compliance_notifier;
mod messaging_service;
mod relationship_service;

pub use account_purge_service::{
    AccountPurgeService, AccountPurgeServiceDependencies, PurgeSettings,
};
pub use compliance_notifier::{
    guardian_recipients, ComplianceNotifier, ComplianceNotifierDependencies, ContactWaliRequest,
    THREAD_NOTIFY_EVERY,
};
pub use messaging_service::{
    MessagingService, MessagingServiceDependencies, SendMessageRequest, SendPermit, ThreadEntry,
    VideoCallRequest,
};
pub use relationship_service::{
    RelationshipService, RelationshipServiceDependencies, RelationshipView, UserSummary,
};
