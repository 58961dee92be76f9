pub mod deal;
pub mod feedback;
