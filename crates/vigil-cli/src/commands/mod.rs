pub mod common;
pub mod context;
pub mod exec_repo;
pub mod init_repo;
pub mod overlay;
pub mod planning_audit;
pub mod roadtrip;
pub mod run;
pub mod run_info;
pub mod signoff;
pub mod tick;
