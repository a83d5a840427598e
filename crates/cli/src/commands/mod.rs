pub mod inspect;
pub mod workloads;
