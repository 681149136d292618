pub mod dedup;
pub mod ledger;
pub mod maintenance;
pub mod subscription;
pub mod webhook_pipeline;
