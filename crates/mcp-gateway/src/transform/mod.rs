// Call-path transformations
//
// - `path`: the path-expression subset used by output projections
// - `detect`: JSON-in-text recognition for text-only tool results
// - `project`: output schema projection plans
// - `engine`: the per-call request/response transforms built on the above

pub mod detect;
pub mod engine;
pub mod path;
pub mod project;
