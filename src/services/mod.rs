pub mod abnormality;
pub mod aggregator;
pub mod forecast;
pub mod logs;
pub mod pagination;
pub mod preprocess;
pub mod stats;
pub mod store;
