pub mod engine;
pub mod history;
pub mod labeler;
pub mod locate;
pub mod question;
pub mod selection;
pub mod state;
pub mod verify;

#[cfg(test)]
pub(crate) mod testing;
