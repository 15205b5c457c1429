//! Navigation history with back/forward support.

/// Immutable navigation history of location URLs.
///
/// Every mutation returns a new `History`. Pushing a URL clears the forward
/// stack, the way a web browser does.
#[derive(Debug, Clone, Default)]
pub struct History {
    back_stack: Vec<String>,
    forward_stack: Vec<String>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `url` as the place to go back to.
    pub fn push(&self, url: impl Into<String>) -> Self {
        let mut back_stack = self.back_stack.clone();
        back_stack.push(url.into());
        Self {
            back_stack,
            forward_stack: Vec::new(),
        }
    }

    /// Steps back, remembering `current` for [`go_forward`](Self::go_forward).
    ///
    /// Returns the new history and the URL to visit, or `None` when there is
    /// nothing to go back to.
    pub fn go_back(&self, current: &str) -> Option<(Self, String)> {
        let mut back_stack = self.back_stack.clone();
        let url = back_stack.pop()?;
        let mut forward_stack = self.forward_stack.clone();
        forward_stack.push(current.to_string());
        Some((
            Self {
                back_stack,
                forward_stack,
            },
            url,
        ))
    }

    pub fn go_forward(&self, current: &str) -> Option<(Self, String)> {
        let mut forward_stack = self.forward_stack.clone();
        let url = forward_stack.pop()?;
        let mut back_stack = self.back_stack.clone();
        back_stack.push(current.to_string());
        Some((
            Self {
                back_stack,
                forward_stack,
            },
            url,
        ))
    }

    pub fn can_go_back(&self) -> bool {
        !self.back_stack.is_empty()
    }

    pub fn can_go_forward(&self) -> bool {
        !self.forward_stack.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn back_then_forward_returns_to_start() {
        let history = History::new().push("/a").push("/b");

        let (history, url) = history.go_back("/c").unwrap();
        assert_eq!(url, "/b");
        assert!(history.can_go_forward());

        let (history, url) = history.go_forward("/b").unwrap();
        assert_eq!(url, "/c");
        assert!(!history.can_go_forward());
        assert!(history.can_go_back());
    }

    #[test]
    fn push_clears_forward_stack() {
        let history = History::new().push("/a");
        let (history, _) = history.go_back("/b").unwrap();
        let history = history.push("/a");
        assert!(!history.can_go_forward());
    }

    #[test]
    fn empty_history_goes_nowhere() {
        let history = History::new();
        assert!(history.go_back("/").is_none());
        assert!(history.go_forward("/").is_none());
    }
}
