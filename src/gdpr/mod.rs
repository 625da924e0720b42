//! GDPR compliance: consent records, data subject requests (access,
//! erasure, portability), retention cleanup and reporting.

pub mod anonymize;
pub mod service;

pub use service::{
    ComplianceReport, ConsentCheck, ConsentRecord, ConsentType, DataSubjectRequest, GdprError,
    GdprResult, GdprService, RequestStatus, RequestType, RetentionCleanup, TrackConsent,
    WithdrawConsent,
};
