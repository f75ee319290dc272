//! Declarative playbooks: scenarios of browser actions to replay.
//!
//! ```json
//! {
//!   "host": "http://localhost:3000",
//!   "viewWidth": 375,
//!   "viewHeight": 677,
//!   "scenarios": [{
//!     "name": "todo",
//!     "path": "/todo.html",
//!     "actions": [
//!       {"type": "typing", "selector": "#new-todo", "value": "milk", "enter": true},
//!       {"type": "exist", "selector": ".todo-item", "shot": true}
//!     ]
//!   }]
//! }
//! ```

pub mod parse;
pub mod types;

pub use parse::{ParseOptions, from_file, from_json, from_value};
pub use types::{Action, ActionKind, Pattern, Playbook, Point, Scenario};
