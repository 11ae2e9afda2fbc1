pub mod admin;
pub mod chat;
pub mod health;
pub mod scoreboard;
pub mod submission;
pub mod validation;
pub mod ws;
