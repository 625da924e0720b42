//! A/B tests over campaign variants: setup, audience split, metric
//! collection, significance and winner selection.

pub mod distribution;
pub mod service;
pub mod statistics;

pub use service::{
    AbTestError, AbTestResult, AbTestResults, AbTestService, AbTestSummary, CampaignVariant,
    CreateAbTest, SendSummary, UpdateVariant, VariantEventKind,
};
pub use statistics::WinnerCriteria;
