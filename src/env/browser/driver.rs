//! The browser automation boundary and the session handle that owns it.

use std::path::Path;

use anyhow::Result;
use tracing::warn;

use crate::projection::{Direction, ScrollTarget};

/// Accessibility-tree dump of the current page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessibilityTree {
    pub text: String,
    /// Number of labelled interactive elements in `text`.
    pub element_count: usize,
}

/// One live browser. Element indices refer to the labels placed by the most
/// recent [`mark_elements`](Self::mark_elements) or
/// [`accessibility_tree`](Self::accessibility_tree) call.
#[allow(async_fn_in_trait)]
pub trait BrowserDriver: Send {
    async fn navigate(&mut self, url: &str) -> Result<()>;

    /// Draw set-of-mark labels on interactive elements; returns how many.
    async fn mark_elements(&mut self) -> Result<usize>;

    async fn accessibility_tree(&mut self) -> Result<AccessibilityTree>;

    async fn click(&mut self, element: usize) -> Result<()>;

    /// Clear the element and type `content` followed by Enter. May return a
    /// warning when the element does not look like a textbox.
    async fn type_text(&mut self, element: usize, content: &str) -> Result<Option<String>>;

    async fn scroll(&mut self, target: ScrollTarget, direction: Direction) -> Result<()>;

    async fn go_back(&mut self) -> Result<()>;

    async fn screenshot(&mut self, path: &Path) -> Result<()>;

    async fn current_url(&mut self) -> Result<String>;

    /// Shut the browser down.
    async fn quit(&mut self) -> Result<()>;
}

/// Starts browsers. One launcher is shared by an environment across resets.
#[allow(async_fn_in_trait)]
pub trait DriverLauncher: Send + Sync {
    type Driver: BrowserDriver;

    async fn launch(&self) -> Result<Self::Driver>;
}

/// Warning text for typing into something that is not a textbox.
pub fn non_textbox_warning(tag_name: &str, input_type: Option<&str>) -> String {
    format!(
        "note: The web element you're trying to type may not be a textbox, and its tag name is <{tag_name}>, type is {}.",
        input_type.unwrap_or("None")
    )
}

/// Owned handle to a launched driver.
///
/// [`release`](Self::release) quits the browser. A session dropped without
/// being released logs a warning; the driver's own `Drop` then tears it down.
#[derive(Debug)]
pub struct DriverSession<D: BrowserDriver> {
    driver: Option<D>,
}

impl<D: BrowserDriver> DriverSession<D> {
    pub fn new(driver: D) -> Self {
        Self {
            driver: Some(driver),
        }
    }

    /// The live driver, or `None` after release.
    pub fn driver(&mut self) -> Option<&mut D> {
        self.driver.as_mut()
    }

    pub fn is_live(&self) -> bool {
        self.driver.is_some()
    }

    /// Quit the browser. Later calls are no-ops.
    pub async fn release(&mut self) -> Result<()> {
        match self.driver.take() {
            Some(mut driver) => driver.quit().await,
            None => Ok(()),
        }
    }
}

impl<D: BrowserDriver> Drop for DriverSession<D> {
    fn drop(&mut self) {
        if self.driver.is_some() {
            warn!("browser session dropped without release");
        }
    }
}
