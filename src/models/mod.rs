pub mod expense;
pub mod file;
pub mod member;
pub mod session;
pub mod trip;
pub mod user;
