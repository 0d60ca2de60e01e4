pub mod engine;
pub mod states;

pub use engine::ReportStateMachine;
pub use states::{
    Actor, Authorization, Decision, ReportAction, TransitionEffect, TransitionOutcome,
};
