//! The `If:` request header (RFC 4918 10.4).
//!
//! The header is a disjunction of condition lists, optionally tagged with
//! the resource they apply to. Every state token that appears anywhere in
//! the header is collected as "submitted", so that handlers can later
//! check a second resource (a MOVE/COPY destination) against it.

use http::StatusCode;

use headers::HeaderMapExt;

use crate::davheaders;
use crate::davpath::DavPath;
use crate::fs::Fs;
use crate::ls::{LockManager, LockSubmitted};

pub(crate) struct IfResult {
    /// `200 OK`, `412 Precondition Failed`, or `423 Locked`.
    pub status: StatusCode,
    /// All `(path, token)` pairs seen while evaluating.
    pub submitted: Vec<LockSubmitted>,
}

struct IfState<'a> {
    cur: &'a str,
    // the path conditions currently apply to; the last tagged URL, or
    // the request path.
    path: String,
    locks: Vec<LockSubmitted>,
    error: bool,
}

impl<'a> IfState<'a> {
    fn new(header: &'a str, path: &str) -> IfState<'a> {
        IfState {
            cur: header,
            path: path.to_string(),
            locks: Vec::new(),
            error: false,
        }
    }

    // skip whitespace; true when the input is exhausted.
    fn eat_whitespaces(&mut self) -> bool {
        self.cur = self.cur.trim_start();
        self.cur.is_empty()
    }

    fn next_token(&mut self, token: &str) -> bool {
        self.eat_whitespaces();
        self.cur.starts_with(token)
    }

    fn accept_token(&mut self, token: &str) -> bool {
        let ok = self.next_token(token);
        if ok {
            self.cur = &self.cur[token.len()..];
        }
        ok
    }

    // `<` already seen: take everything up to `>`.
    fn accept_ref(&mut self) -> Option<String> {
        if !self.accept_token("<") {
            return None;
        }
        let end = self.cur.find('>')?;
        let url = self.cur[..end].to_string();
        self.cur = &self.cur[end + 1..];
        Some(url)
    }

    // `["etag"]`, standard quoted-string with backslash escapes.
    fn accept_etag(&mut self) -> Option<String> {
        if !self.accept_token("[") {
            return None;
        }
        if !self.accept_token("\"") {
            return None;
        }
        let mut out = String::new();
        let mut chars = self.cur.char_indices();
        let rest;
        loop {
            let (i, c) = chars.next()?;
            match c {
                '"' => {
                    rest = &self.cur[i + 1..];
                    break;
                }
                '\\' => {
                    let (_, esc) = chars.next()?;
                    out.push(esc);
                }
                c => out.push(c),
            }
        }
        self.cur = rest;
        if !self.accept_token("]") {
            return None;
        }
        Some(out)
    }
}

fn check_token(ls: &LockManager, path: &str, token: &str) -> bool {
    debug!("check {} for {}", token, path);
    // tokens in the DAV: namespace always evaluate to false (10.4.8).
    if token == "DAV:no-lock" {
        return false;
    }
    ls.get_lock(path, token).is_some()
}

async fn check_etag(fs: &Fs, path: &str, etag: &str) -> bool {
    debug!("check etag {} for {}", etag, path);
    let Ok(davpath) = DavPath::new(path) else {
        return false;
    };
    match fs.resolve(&davpath).query_info().await {
        Ok(info) => info.etag.as_deref() == Some(etag),
        Err(_) => false,
    }
}

async fn eval_condition(fs: &Fs, ls: &LockManager, state: &mut IfState<'_>) -> bool {
    if state.next_token("<") {
        let Some(token) = state.accept_ref() else {
            state.error = true;
            return false;
        };
        state.locks.push(LockSubmitted::new(&state.path, &token));
        check_token(ls, &state.path, &token)
    } else if state.next_token("[") {
        let Some(etag) = state.accept_etag() else {
            state.error = true;
            return false;
        };
        check_etag(fs, &state.path, &etag).await
    } else {
        state.error = true;
        false
    }
}

async fn eval_not_condition(fs: &Fs, ls: &LockManager, state: &mut IfState<'_>) -> bool {
    let not = state.accept_token("Not");
    let res = eval_condition(fs, ls, state).await;
    if not {
        !res
    } else {
        res
    }
}

// one parenthesized list; the conditions are ANDed.
async fn eval_list(fs: &Fs, ls: &LockManager, state: &mut IfState<'_>) -> bool {
    if !state.accept_token("(") {
        state.error = true;
        return false;
    }
    let mut success = eval_not_condition(fs, ls, state).await;
    while !state.accept_token(")") {
        if state.error || state.eat_whitespaces() {
            state.error = true;
            return false;
        }
        success &= eval_not_condition(fs, ls, state).await;
    }
    success
}

// consecutive lists are ORed.
async fn eval_lists(fs: &Fs, ls: &LockManager, state: &mut IfState<'_>) -> bool {
    if !state.next_token("(") {
        state.error = true;
        return false;
    }
    let mut success = false;
    while state.next_token("(") {
        success |= eval_list(fs, ls, state).await;
        if state.error {
            return false;
        }
    }
    success
}

// `<url>` binds the following lists to that resource.
async fn eval_tag(fs: &Fs, ls: &LockManager, state: &mut IfState<'_>) -> bool {
    let Some(r) = state.accept_ref() else {
        state.error = true;
        return false;
    };
    let path = if r.starts_with('/') {
        r
    } else {
        match url::Url::parse(&r) {
            Ok(u) => u.path().to_string(),
            Err(_) => {
                state.error = true;
                return false;
            }
        }
    };
    state.path = match DavPath::new(&path) {
        Ok(p) => p.as_str().to_string(),
        Err(_) => {
            state.error = true;
            return false;
        }
    };
    eval_lists(fs, ls, state).await
}

async fn eval_if(fs: &Fs, ls: &LockManager, state: &mut IfState<'_>) -> bool {
    let mut success = false;
    if state.next_token("<") {
        while !state.eat_whitespaces() && !state.error {
            success |= eval_tag(fs, ls, state).await;
        }
    } else {
        while !state.eat_whitespaces() && !state.error {
            success |= eval_lists(fs, ls, state).await;
        }
    }
    success && !state.error
}

/// Evaluate the `If:` header for a request on `path`.
///
/// Returns `200 OK` when the header holds (or is absent), `412` when it
/// fails, and `423` when the path or an ancestor carries a lock whose
/// token was not submitted. A COPY skips that last check for its source;
/// the destination is re-checked separately by the handler.
pub(crate) async fn check_if(
    fs: &Fs,
    ls: &LockManager,
    headers: &http::HeaderMap,
    is_copy: bool,
    path: &DavPath,
) -> IfResult {
    let hdr = headers.typed_get::<davheaders::If>();
    let mut submitted = Vec::new();
    let mut success = true;

    if let Some(davheaders::If(ref s)) = hdr {
        let mut state = IfState::new(s, path.as_str());
        success = eval_if(fs, ls, &mut state).await;
        if success {
            // tokens collected in failing branches count as submitted too.
            submitted = state.locks;
        }
    }

    let mut status = if success {
        StatusCode::OK
    } else {
        StatusCode::PRECONDITION_FAILED
    };

    if success && !is_copy && ls.has_other_locks(path.as_str(), &submitted) {
        status = StatusCode::LOCKED;
    }

    IfResult { status, submitted }
}
