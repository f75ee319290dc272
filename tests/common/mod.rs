//! Shared fixtures for integration tests: mock pages and event helpers.

#![allow(dead_code)]

use serde_json::Value;
use std::path::Path;
use std::time::Duration;

use vbot::browser::mock::{Effect, MockElement, MockLauncher, MockPage};
use vbot::{ActionLog, ParseOptions, Playbook, RunEvent, RunOptions};

pub const TODO_URL: &str = "http://mock.test/todo";
pub const DEMO_URL: &str = "http://mock.test/demo";
pub const BOX_URL: &str = "http://mock.test/box";

pub const BOX_COLOR: [u8; 3] = [200, 200, 255];

pub fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

/// Todo list: type into `#item`, add with Enter or `#add`.
///
/// Item `n` renders as `li#todo-{n}` with `li#todo-{n} .done` and
/// `li#todo-{n} .remove` buttons next to it.
pub fn todo_page() -> MockPage {
    MockPage::new("todo")
        .element(
            MockElement::new("#item", 10, 10, 200, 24)
                .color([255, 255, 255])
                .on_enter(Effect::custom(add_item)),
        )
        .element(
            MockElement::new("#add", 220, 10, 40, 24)
                .text("add")
                .on_click(Effect::custom(add_item)),
        )
}

fn add_item(page: &mut MockPage) {
    let Some(text) = page.find_mut("#item").map(|el| std::mem::take(&mut el.value)) else {
        return;
    };
    if text.is_empty() {
        return;
    }
    let n = page
        .elements
        .iter()
        .filter(|e| e.selector.starts_with("li#todo-") && !e.selector.contains(' '))
        .count();
    let y = 50 + 30 * n as u32;
    let item = format!("li#todo-{n}");
    let done = format!("{item} .done");
    let remove = format!("{item} .remove");

    page.push(MockElement::new(&item, 10, y, 200, 24).text(text));
    page.push(
        MockElement::new(&done, 215, y, 20, 24)
            .color([200, 200, 255])
            .on_click(Effect::SetColor {
                selector: item.clone(),
                color: [180, 230, 180],
            }),
    );
    let removed = [item, done, remove.clone()];
    page.push(
        MockElement::new(&remove, 240, y, 20, 24)
            .color([255, 200, 200])
            .on_click(Effect::custom(move |page| {
                for selector in &removed {
                    page.remove(selector);
                }
            })),
    );
}

/// `#demo` reads "loading" until 1s after load, then "can you see me?"
pub fn demo_page() -> MockPage {
    MockPage::new("demo").element(
        MockElement::new("#demo", 10, 10, 300, 24)
            .text("loading")
            .text_at(ms(1000), "can you see me?"),
    )
}

/// A single coloured `#box`
pub fn box_page(color: [u8; 3]) -> MockPage {
    MockPage::new("box").element(MockElement::new("#box", 50, 50, 100, 100).color(color))
}

pub fn launcher() -> MockLauncher {
    MockLauncher::new()
        .with_page(TODO_URL, todo_page())
        .with_page(DEMO_URL, demo_page())
        .with_page(BOX_URL, box_page(BOX_COLOR))
}

pub fn playbook(json: Value) -> Playbook {
    vbot::playbook::from_value(json, &ParseOptions::default()).unwrap()
}

pub fn options(imgdir: &Path) -> RunOptions {
    RunOptions::new()
        .imgdir(imgdir)
        .mismatch_threshold(0.0)
        .animation_timeout(ms(5000))
}

pub fn executed(events: &[RunEvent]) -> Vec<&ActionLog> {
    events
        .iter()
        .filter_map(|event| match event {
            RunEvent::ActionExecuted { log, .. } => Some(log),
            _ => None,
        })
        .collect()
}

pub fn count(events: &[RunEvent], pred: impl Fn(&RunEvent) -> bool) -> usize {
    events.iter().filter(|e| pred(e)).count()
}
