pub mod commerce;
pub mod context;
pub mod intent;
pub mod plan;
pub mod strategy;
