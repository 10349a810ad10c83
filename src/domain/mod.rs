// Domain layer - Quality profiles, media descriptions and pipeline rules

pub mod model;
pub mod rules;
