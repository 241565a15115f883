//! Wildcard path expressions over JSON documents.
//!
//! A query such as `status/wan/devices/mdm*/diagnostics/SIGNAL` names one
//! logical column, but routers expose a different number of modems, so the
//! expression is expanded against each device's actual response into as
//! many concrete paths as that device has.

mod expression;
mod resolver;

pub use expression::{PathExpression, Segment, WildcardPattern, WILDCARD};
pub use resolver::{display_text, display_value, expand, resolve_wildcard_path, MatchResult};
