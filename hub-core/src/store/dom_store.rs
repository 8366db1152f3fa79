//! Persistent virtual DOM container: holds a snapshot of an agent's page
//! when no browser is attached, and reflects changes back into a live DOM
//! once one attaches.
//!
//! There's no HTML parsing crate in the dependency stack, so this is a
//! minimal hand-rolled tree good enough for single-element create/modify/
//! query/remove and whole-document capture/restore. Selectors support only
//! `#id`, `.class`, and bare tag name — no combinators, no attribute
//! selectors.

use crate::model::DomSnapshot;
use std::collections::HashMap;
use tokio::sync::Mutex as AsyncMutex;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum DomError {
    #[error("no element matches selector {0:?}")]
    NoMatch(String),
    #[error("malformed html fragment")]
    Malformed,
}

#[derive(Clone, Debug, Default)]
pub struct DomNode {
    pub flo_id: String,
    pub tag: String,
    pub attrs: HashMap<String, String>,
    pub text_content: Option<String>,
    pub inner_html: String,
    pub children: Vec<DomNode>,
}

impl DomNode {
    fn matches(&self, selector: &str) -> bool {
        if let Some(id) = selector.strip_prefix('#') {
            return self.flo_id == id || self.attrs.get("id").map(|v| v.as_str()) == Some(id);
        }
        if let Some(class) = selector.strip_prefix('.') {
            return self
                .attrs
                .get("class")
                .map(|c| c.split_whitespace().any(|c| c == class))
                .unwrap_or(false);
        }
        self.tag.eq_ignore_ascii_case(selector)
    }

    fn find_mut<'a>(&'a mut self, selector: &str) -> Option<&'a mut DomNode> {
        if self.matches(selector) {
            return Some(self);
        }
        for child in &mut self.children {
            if let Some(found) = child.find_mut(selector) {
                return Some(found);
            }
        }
        None
    }

    fn find<'a>(&'a self, selector: &str) -> Option<&'a DomNode> {
        if self.matches(selector) {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(selector))
    }

    fn remove_matching(&mut self, selector: &str) -> bool {
        let before = self.children.len();
        self.children.retain(|c| !c.matches(selector));
        if self.children.len() != before {
            return true;
        }
        for child in &mut self.children {
            if child.remove_matching(selector) {
                return true;
            }
        }
        false
    }

    fn render(&self) -> String {
        let attrs: String = self
            .attrs
            .iter()
            .map(|(k, v)| format!(" {k}=\"{v}\""))
            .collect();
        let inner = if !self.children.is_empty() {
            self.children.iter().map(DomNode::render).collect::<String>()
        } else if let Some(text) = &self.text_content {
            text.clone()
        } else {
            self.inner_html.clone()
        };
        format!("<{tag}{attrs}>{inner}</{tag}>", tag = self.tag)
    }
}

#[derive(Default)]
pub struct DomStore {
    inner: AsyncMutex<State>,
}

#[derive(Default)]
struct State {
    body: DomNode,
    next_id: u64,
}

impl DomStore {
    pub fn new() -> Self {
        Self {
            inner: AsyncMutex::new(State {
                body: DomNode {
                    flo_id: "root".into(),
                    tag: "body".into(),
                    ..Default::default()
                },
                next_id: 0,
            }),
        }
    }

    /// Parses `html`'s root element and appends it under `parent_selector`
    /// (or the body root when absent).
    pub async fn create(
        &self,
        html: &str,
        parent_selector: Option<&str>,
    ) -> Result<String, DomError> {
        let mut state = self.inner.lock().await;
        state.next_id += 1;
        let flo_id = format!("flo-{}", state.next_id);
        let mut node = parse_fragment(html)?;
        node.flo_id = flo_id.clone();
        node.attrs
            .entry("data-flo-id".into())
            .or_insert_with(|| flo_id.clone());

        let parent = match parent_selector {
            Some(sel) => state.body.find_mut(sel).ok_or_else(|| DomError::NoMatch(sel.into()))?,
            None => &mut state.body,
        };
        parent.children.push(node);
        Ok(flo_id)
    }

    pub async fn modify(
        &self,
        selector: &str,
        attributes: Option<HashMap<String, String>>,
        text_content: Option<String>,
        inner_html: Option<String>,
    ) -> Result<(), DomError> {
        let mut state = self.inner.lock().await;
        let node = state
            .body
            .find_mut(selector)
            .ok_or_else(|| DomError::NoMatch(selector.into()))?;
        if let Some(attrs) = attributes {
            node.attrs.extend(attrs);
        }
        if let Some(text) = text_content {
            node.text_content = Some(text);
        }
        if let Some(html) = inner_html {
            node.inner_html = html;
        }
        Ok(())
    }

    pub async fn query(&self, selector: &str) -> Option<String> {
        self.inner.lock().await.body.find(selector).map(DomNode::render)
    }

    pub async fn remove(&self, selector: &str) -> Result<(), DomError> {
        let mut state = self.inner.lock().await;
        if state.body.remove_matching(selector) {
            Ok(())
        } else {
            Err(DomError::NoMatch(selector.into()))
        }
    }

    pub async fn capture(&self) -> DomSnapshot {
        let state = self.inner.lock().await;
        DomSnapshot {
            body_html: state.body.render(),
            body_attrs: state.body.attrs.clone(),
            head_html: String::new(),
            html_attrs: HashMap::new(),
            registered_listeners: Vec::new(),
            captured_at: Some(chrono::Utc::now()),
        }
    }

    pub async fn restore(&self, snapshot: DomSnapshot) -> Result<(), DomError> {
        let mut body = parse_fragment(&snapshot.body_html).unwrap_or_else(|_| DomNode {
            flo_id: "root".into(),
            tag: "body".into(),
            ..Default::default()
        });
        body.flo_id = "root".into();
        body.attrs.extend(snapshot.body_attrs);
        let mut state = self.inner.lock().await;
        state.body = body;
        Ok(())
    }
}

fn parse_fragment(html: &str) -> Result<DomNode, DomError> {
    let html = html.trim();
    let open_start = html.find('<').ok_or(DomError::Malformed)?;
    let open_end = html[open_start..].find('>').ok_or(DomError::Malformed)? + open_start;
    let header = &html[open_start + 1..open_end];
    let self_closing = header.trim_end().ends_with('/');
    let header = header.trim_end_matches('/').trim();

    let mut parts = header.splitn(2, char::is_whitespace);
    let tag = parts.next().unwrap_or("div").to_string();
    let attrs = parts.next().map(parse_attrs).unwrap_or_default();

    let closing_tag = format!("</{tag}>");
    let inner = if self_closing {
        String::new()
    } else if let Some(close_idx) = html.rfind(&closing_tag) {
        html[open_end + 1..close_idx].to_string()
    } else {
        html[open_end + 1..].to_string()
    };

    Ok(DomNode {
        flo_id: String::new(),
        tag,
        attrs,
        text_content: None,
        inner_html: inner,
        children: Vec::new(),
    })
}

fn parse_attrs(s: &str) -> HashMap<String, String> {
    let mut attrs = HashMap::new();
    let mut rest = s.trim();
    while let Some(eq) = rest.find('=') {
        let name = rest[..eq].trim().to_string();
        rest = rest[eq + 1..].trim_start();
        if let Some(quote) = rest.chars().next().filter(|c| *c == '"' || *c == '\'') {
            if let Some(end) = rest[1..].find(quote) {
                let value = rest[1..1 + end].to_string();
                if !name.is_empty() {
                    attrs.insert(name, value);
                }
                rest = rest[1 + end + 1..].trim_start();
                continue;
            }
        }
        break;
    }
    attrs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_modify_query_remove_roundtrip() {
        let dom = DomStore::new();
        let id = dom.create(r#"<div class="card">hi</div>"#, None).await.unwrap();
        let rendered = dom.query(&format!("#{id}")).await.unwrap();
        assert!(rendered.contains("hi"));

        dom.modify(&format!("#{id}"), None, Some("updated".into()), None)
            .await
            .unwrap();
        let rendered = dom.query(&format!("#{id}")).await.unwrap();
        assert!(rendered.contains("updated"));

        dom.remove(&format!("#{id}")).await.unwrap();
        assert!(dom.query(&format!("#{id}")).await.is_none());
    }

    #[tokio::test]
    async fn capture_restore_roundtrip() {
        let dom = DomStore::new();
        dom.create(r#"<span class="tag">x</span>"#, None).await.unwrap();
        let snapshot = dom.capture().await;

        let dom2 = DomStore::new();
        dom2.restore(snapshot).await.unwrap();
        assert!(dom2.query(".tag").await.is_some());
    }
}
