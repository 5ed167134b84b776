//! Scripted transport for pager and driver tests

use crate::ingestion::utils::{HttpReply, Transport};
use anyhow::Result;
use std::cell::RefCell;
use std::collections::VecDeque;

pub enum Scripted {
    Reply(HttpReply),
    NetworkError(&'static str),
}

pub fn json(body: &str) -> Scripted {
    Scripted::Reply(HttpReply::json(200, body.as_bytes().to_vec()))
}

pub fn status(code: u16) -> Scripted {
    Scripted::Reply(HttpReply::json(code, b"{\"error\":\"nope\"}".to_vec()))
}

pub fn html(body: &str) -> Scripted {
    Scripted::Reply(HttpReply {
        status: 200,
        content_type: Some("text/html; charset=utf-8".to_string()),
        body: body.as_bytes().to_vec(),
    })
}

/// Hands out scripted replies in order and records every request.
/// Runs dry with a network error so a runaway pager fails loudly.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: RefCell<VecDeque<Scripted>>,
    requests: RefCell<Vec<(String, Vec<(String, String)>)>>,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<Scripted>) -> Self {
        ScriptedTransport {
            replies: RefCell::new(replies.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.borrow().len()
    }

    /// Value of `key` in the n-th request's query
    pub fn query_value(&self, n: usize, key: &str) -> Option<String> {
        self.requests.borrow().get(n).and_then(|(_, q)| {
            q.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
        })
    }

    pub fn url(&self, n: usize) -> Option<String> {
        self.requests.borrow().get(n).map(|(u, _)| u.clone())
    }
}

impl Transport for ScriptedTransport {
    async fn get(&self, url: &str, query: &[(String, String)]) -> Result<HttpReply> {
        self.requests
            .borrow_mut()
            .push((url.to_string(), query.to_vec()));

        match self.replies.borrow_mut().pop_front() {
            Some(Scripted::Reply(reply)) => Ok(reply),
            Some(Scripted::NetworkError(msg)) => Err(anyhow::anyhow!(msg)),
            None => Err(anyhow::anyhow!("script exhausted")),
        }
    }
}
