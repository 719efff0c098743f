pub mod health;
pub mod members;
pub mod rules;
pub mod stages;
pub mod tasks;
