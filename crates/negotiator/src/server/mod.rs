pub mod comm;
pub mod evaluator;
pub mod inventory;
pub mod negotiation_loop;
pub mod statedir;
