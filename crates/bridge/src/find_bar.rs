//! Find-bar state on the panel side.

use pagebridge_core::Result;
use serde_json::json;
use tracing::debug;

use crate::panel::PanelConnection;

/// Index after `current` among `n` matches, wrapping to 0.
pub fn next_index(current: i64, n: usize) -> Option<i64> {
    if n == 0 {
        return None;
    }
    let n = n as i64;
    Some((current + 1).rem_euclid(n))
}

/// Index before `current` among `n` matches, wrapping to `n - 1`.
pub fn previous_index(current: i64, n: usize) -> Option<i64> {
    if n == 0 {
        return None;
    }
    let n = n as i64;
    Some((current - 1 + n).rem_euclid(n))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindBar {
    text: String,
    /// None until the host has answered the latest query.
    matches_length: Option<usize>,
    previous_index: i64,
    current_index: i64,
    open: bool,
}

impl Default for FindBar {
    fn default() -> Self {
        Self {
            text: String::new(),
            matches_length: None,
            previous_index: -1,
            current_index: 0,
            open: false,
        }
    }
}

impl FindBar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn matches_length(&self) -> Option<usize> {
        self.matches_length
    }

    pub fn current_index(&self) -> i64 {
        self.current_index
    }

    pub fn previous_index(&self) -> i64 {
        self.previous_index
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// `1 / 3` style counter, empty while there is nothing to count.
    pub fn counter(&self) -> String {
        match self.matches_length {
            Some(n) if n > 0 => format!("{} / {}", self.current_index + 1, n),
            _ => String::new(),
        }
    }

    /// Reaction to the page's `extension.openFindSearchBar` event.
    pub fn open(&mut self) {
        self.open = true;
    }

    /// Send `text` as the new query and emphasise the first match.
    pub async fn search(&mut self, text: &str, conn: &PanelConnection) -> Result<usize> {
        self.open = true;
        self.text = text.to_string();
        self.matches_length = None;
        self.previous_index = -1;
        self.current_index = 0;

        let reply = conn
            .call(
                "extension.findSearchBarQuery",
                json!({ "value": { "text": text } }),
            )
            .await?;
        let n = reply.as_u64().unwrap_or(0) as usize;
        self.matches_length = Some(n);
        if n > 0 {
            self.send_scroll(conn).await?;
        }
        Ok(n)
    }

    /// Advance to the next match. Returns false when there are no matches.
    pub async fn next(&mut self, conn: &PanelConnection) -> Result<bool> {
        self.step(conn, next_index).await
    }

    pub async fn previous(&mut self, conn: &PanelConnection) -> Result<bool> {
        self.step(conn, previous_index).await
    }

    /// Enter in the find field.
    pub async fn on_enter(&mut self, conn: &PanelConnection) -> Result<bool> {
        self.next(conn).await
    }

    pub async fn close(&mut self, conn: &PanelConnection) -> Result<()> {
        *self = Self::default();
        conn.notify("extension.closeFindSearchBar", json!({})).await
    }

    async fn step(
        &mut self,
        conn: &PanelConnection,
        advance: fn(i64, usize) -> Option<i64>,
    ) -> Result<bool> {
        let n = self.matches_length.unwrap_or(0);
        let Some(target) = advance(self.current_index, n) else {
            debug!("No matches to navigate");
            return Ok(false);
        };
        self.previous_index = self.current_index;
        self.current_index = target;
        self.send_scroll(conn).await?;
        Ok(true)
    }

    async fn send_scroll(&self, conn: &PanelConnection) -> Result<()> {
        conn.notify(
            "extension.scrollToFindSearchBarQueryMatch",
            json!({
                "value": {
                    "previousIndex": self.previous_index,
                    "currentIndex": self.current_index,
                }
            }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::testing::connect;

    #[test]
    fn test_wraparound_both_directions() {
        assert_eq!(next_index(2, 3), Some(0));
        assert_eq!(previous_index(0, 3), Some(2));
        assert_eq!(next_index(0, 1), Some(0));

        let mut i = 0;
        for _ in 0..7 {
            i = next_index(i, 3).unwrap();
        }
        assert_eq!(i, 1);
    }

    #[test]
    fn test_no_matches_is_a_no_op() {
        assert_eq!(next_index(0, 0), None);
        assert_eq!(previous_index(0, 0), None);
    }

    #[tokio::test]
    async fn test_search_then_navigate() {
        let (conn, mut seen) = connect(|req| {
            (req.action == "extension.findSearchBarQuery").then(|| json!(3))
        });
        let mut bar = FindBar::new();
        assert_eq!(bar.search("rust", &conn).await.unwrap(), 3);
        assert_eq!(bar.counter(), "1 / 3");

        let query = seen.recv().await.unwrap();
        assert_eq!(query.params_or_null()["value"]["text"], "rust");
        let scroll = seen.recv().await.unwrap();
        assert_eq!(scroll.action, "extension.scrollToFindSearchBarQueryMatch");
        assert_eq!(scroll.params_or_null()["value"]["previousIndex"], -1);
        assert_eq!(scroll.params_or_null()["value"]["currentIndex"], 0);

        assert!(bar.previous(&conn).await.unwrap());
        assert_eq!(bar.current_index(), 2);
        assert_eq!(bar.previous_index(), 0);

        assert!(bar.on_enter(&conn).await.unwrap());
        assert_eq!(bar.current_index(), 0);
        assert_eq!(bar.previous_index(), 2);
    }

    #[tokio::test]
    async fn test_zero_matches_sends_nothing_on_navigation() {
        let (conn, mut seen) = connect(|req| {
            (req.action == "extension.findSearchBarQuery").then(|| json!(0))
        });
        let mut bar = FindBar::new();
        assert_eq!(bar.search("absent", &conn).await.unwrap(), 0);
        assert!(!bar.next(&conn).await.unwrap());
        assert!(!bar.previous(&conn).await.unwrap());
        assert_eq!(bar.counter(), "");

        bar.close(&conn).await.unwrap();
        assert_eq!(seen.recv().await.unwrap().action, "extension.findSearchBarQuery");
        assert_eq!(seen.recv().await.unwrap().action, "extension.closeFindSearchBar");
    }

    #[tokio::test]
    async fn test_close_resets_state() {
        let (conn, _seen) = connect(|_| Some(json!(2)));
        let mut bar = FindBar::new();
        bar.search("a", &conn).await.unwrap();
        bar.next(&conn).await.unwrap();
        bar.close(&conn).await.unwrap();
        assert_eq!(bar, FindBar::new());
    }
}
