pub mod pipeline;
pub mod status;
