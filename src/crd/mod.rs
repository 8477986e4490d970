pub mod experiment;
pub mod rollout;
