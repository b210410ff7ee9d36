pub mod doctor;
pub mod up;
