//! A scripted in-memory browser for tests and dry runs.
//!
//! Pages are plain URLs. Clicking element `i` opens `<url>/link<i>`, typing
//! opens `<url>?q=<content>`, and every page exposes the same number of
//! labelled elements. Screenshots are written as tiny PNG stubs so artifact
//! paths can be checked on disk.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use super::driver::{non_textbox_warning, AccessibilityTree, BrowserDriver, DriverLauncher};
use crate::projection::{Direction, ScrollTarget};

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

#[derive(Debug, Default)]
struct Counters {
    launches: AtomicUsize,
    quits: AtomicUsize,
}

/// Launches [`ScriptedDriver`]s that share one set of counters.
#[derive(Debug, Clone)]
pub struct ScriptedLauncher {
    element_count: usize,
    textboxes: Vec<usize>,
    fail_launch: bool,
    fail_navigation: bool,
    fail_marking: bool,
    counters: Arc<Counters>,
}

impl ScriptedLauncher {
    /// Every page exposes `element_count` elements; element 0 is a textbox.
    pub fn new(element_count: usize) -> Self {
        Self {
            element_count,
            textboxes: vec![0],
            fail_launch: false,
            fail_navigation: false,
            fail_marking: false,
            counters: Arc::default(),
        }
    }

    pub fn with_textboxes(mut self, textboxes: Vec<usize>) -> Self {
        self.textboxes = textboxes;
        self
    }

    pub fn failing_launch(mut self) -> Self {
        self.fail_launch = true;
        self
    }

    pub fn failing_navigation(mut self) -> Self {
        self.fail_navigation = true;
        self
    }

    pub fn failing_marking(mut self) -> Self {
        self.fail_marking = true;
        self
    }

    pub fn launch_count(&self) -> usize {
        self.counters.launches.load(Ordering::SeqCst)
    }

    pub fn quit_count(&self) -> usize {
        self.counters.quits.load(Ordering::SeqCst)
    }
}

impl DriverLauncher for ScriptedLauncher {
    type Driver = ScriptedDriver;

    async fn launch(&self) -> Result<ScriptedDriver> {
        if self.fail_launch {
            bail!("chromedriver unavailable");
        }
        self.counters.launches.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedDriver {
            config: self.clone(),
            pages: Vec::new(),
            scroll_offset: 0,
        })
    }
}

/// A fake browser tab with a back stack.
#[derive(Debug)]
pub struct ScriptedDriver {
    config: ScriptedLauncher,
    pages: Vec<String>,
    scroll_offset: i64,
}

impl ScriptedDriver {
    fn current(&self) -> Result<&str> {
        self.pages
            .last()
            .map(String::as_str)
            .context("no page loaded")
    }

    fn check(&self, element: usize) -> Result<()> {
        if element >= self.config.element_count {
            bail!("stale element reference: {element}");
        }
        Ok(())
    }
}

impl BrowserDriver for ScriptedDriver {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        if self.config.fail_navigation {
            bail!("net::ERR_NAME_NOT_RESOLVED at {url}");
        }
        self.pages.push(url.to_string());
        self.scroll_offset = 0;
        Ok(())
    }

    async fn mark_elements(&mut self) -> Result<usize> {
        if self.config.fail_marking {
            bail!("javascript error: document.body is null");
        }
        Ok(self.config.element_count)
    }

    async fn accessibility_tree(&mut self) -> Result<AccessibilityTree> {
        if self.config.fail_marking {
            bail!("accessibility snapshot failed");
        }
        let url = self.current()?;
        let mut text = format!("RootWebArea '{url}'");
        for i in 0..self.config.element_count {
            let role = if self.config.textboxes.contains(&i) {
                "textbox"
            } else {
                "link"
            };
            text.push_str(&format!("\n[{i}] {role} 'item {i}'"));
        }
        Ok(AccessibilityTree {
            text,
            element_count: self.config.element_count,
        })
    }

    async fn click(&mut self, element: usize) -> Result<()> {
        self.check(element)?;
        let next = format!("{}/link{element}", self.current()?.trim_end_matches('/'));
        self.pages.push(next);
        Ok(())
    }

    async fn type_text(&mut self, element: usize, content: &str) -> Result<Option<String>> {
        self.check(element)?;
        let next = format!("{}?q={}", self.current()?, content.replace(' ', "+"));
        self.pages.push(next);
        if self.config.textboxes.contains(&element) {
            Ok(None)
        } else {
            Ok(Some(non_textbox_warning("a", None)))
        }
    }

    async fn scroll(&mut self, target: ScrollTarget, direction: Direction) -> Result<()> {
        if let ScrollTarget::Element(i) = target {
            self.check(i)?;
        }
        self.scroll_offset += match direction {
            Direction::Up => -1,
            Direction::Down => 1,
        };
        Ok(())
    }

    async fn go_back(&mut self) -> Result<()> {
        if self.pages.len() < 2 {
            bail!("no previous page");
        }
        self.pages.pop();
        Ok(())
    }

    async fn screenshot(&mut self, path: &Path) -> Result<()> {
        tokio::fs::write(path, PNG_MAGIC)
            .await
            .with_context(|| format!("failed to write screenshot {}", path.display()))
    }

    async fn current_url(&mut self) -> Result<String> {
        self.current().map(str::to_string)
    }

    async fn quit(&mut self) -> Result<()> {
        self.config.counters.quits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
