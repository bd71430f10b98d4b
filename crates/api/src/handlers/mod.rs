pub mod assignments;
pub mod health;
pub mod nodes;
pub mod tasks;
