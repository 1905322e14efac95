pub mod edits;
pub mod output;
pub mod userprio;
