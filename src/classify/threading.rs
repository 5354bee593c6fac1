//! JWZ-based email threading.
//!
//! Groups messages into conversation threads using `Message-ID`,
//! `In-Reply-To`, and `References`, then merges root sets that share a
//! normalized subject.
//!
//! Reference: <https://www.jwz.org/doc/threading.html>

use std::collections::HashMap;

use crate::model::message::Message;

/// A conversation: every message reachable from one root set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thread {
    /// Bucket label: the root `Message-ID`, or `@<offset>` for a root
    /// message without one.
    pub key: String,
    /// Normalized subject of the first message in the thread.
    pub subject: String,
    /// Message indices, in archive order.
    pub members: Vec<usize>,
}

/// Internal container used during the threading algorithm.
#[derive(Debug)]
struct Container {
    /// Index into the message slice, if this container holds a real message.
    message: Option<usize>,
    parent: Option<String>,
    children: Vec<String>,
}

impl Container {
    fn empty() -> Self {
        Self {
            message: None,
            parent: None,
            children: Vec::new(),
        }
    }
}

/// Build threads from the full, archive-ordered message list.
///
/// Threads come back ordered by their first appearance in the archive and
/// every message belongs to exactly one thread. The result depends only on
/// the input, never on hash iteration order.
pub fn build_threads(messages: &[Message]) -> Vec<Thread> {
    if messages.is_empty() {
        return Vec::new();
    }

    let mut containers: HashMap<String, Container> = HashMap::new();
    // Container ids in creation order, so later passes are deterministic.
    let mut order: Vec<String> = Vec::new();

    for (idx, msg) in messages.iter().enumerate() {
        let id = container_id(msg, idx, &containers);
        if !containers.contains_key(&id) {
            containers.insert(id.clone(), Container::empty());
            order.push(id.clone());
        }
        if let Some(c) = containers.get_mut(&id) {
            c.message = Some(idx);
        }

        // References: A B C means A→B→C→this message.
        let mut chain: Vec<String> = msg
            .references
            .iter()
            .filter(|r| !r.is_empty())
            .cloned()
            .collect();
        if let Some(reply_to) = msg.in_reply_to.as_ref().filter(|r| !r.is_empty()) {
            if !chain.contains(reply_to) {
                chain.push(reply_to.clone());
            }
        }
        for rid in &chain {
            if !containers.contains_key(rid) {
                containers.insert(rid.clone(), Container::empty());
                order.push(rid.clone());
            }
        }
        chain.push(id);

        // Ancestor links only fill in missing parents; the last link sets
        // this message's own parent.
        let last = chain.len().saturating_sub(2);
        for (i, window) in chain.windows(2).enumerate() {
            let (parent, child) = (&window[0], &window[1]);
            if i == last || containers.get(child).is_some_and(|c| c.parent.is_none()) {
                link(&mut containers, parent, child);
            }
        }
    }

    // Roots in order of their earliest message; empty chains are dropped.
    let mut roots: Vec<(usize, &String)> = order
        .iter()
        .filter(|id| containers.get(id.as_str()).is_some_and(|c| c.parent.is_none()))
        .filter_map(|id| {
            let mut members = Vec::new();
            collect(id, &containers, &mut members);
            members.into_iter().min().map(|first| (first, id))
        })
        .collect();
    roots.sort_by_key(|(first, _)| *first);

    // Merge root sets with the same normalized subject.
    let mut threads: Vec<Thread> = Vec::new();
    let mut by_subject: HashMap<String, usize> = HashMap::new();

    for (first, root_id) in roots {
        let mut members = Vec::new();
        collect(root_id, &containers, &mut members);
        let subject = normalize_subject(&messages[first].subject);

        if !subject.is_empty() {
            if let Some(&existing) = by_subject.get(&subject) {
                threads[existing].members.extend(members);
                continue;
            }
            by_subject.insert(subject.clone(), threads.len());
        }

        let root_message = containers.get(root_id.as_str()).and_then(|c| c.message);
        let key = match root_message {
            Some(i) if messages[i].message_id.as_ref() != Some(root_id) => {
                format!("@{}", messages[i].source_offset)
            }
            _ => root_id.clone(),
        };

        threads.push(Thread {
            key,
            subject,
            members,
        });
    }

    for thread in &mut threads {
        thread.members.sort_unstable();
        thread.members.dedup();
    }
    threads
}

/// The container id for a message: its `Message-ID`, or a synthetic id when
/// it has none or the id was already claimed by an earlier message.
fn container_id(msg: &Message, idx: usize, containers: &HashMap<String, Container>) -> String {
    match msg.message_id.as_deref().filter(|id| !id.is_empty()) {
        Some(id) if containers.get(id).is_none_or(|c| c.message.is_none()) => id.to_string(),
        _ => format!("\u{0}synth:{idx}"),
    }
}

/// Make `parent_id` the parent of `child_id` unless that would form a cycle.
fn link(containers: &mut HashMap<String, Container>, parent_id: &str, child_id: &str) {
    if parent_id == child_id || would_create_cycle(containers, parent_id, child_id) {
        return;
    }

    let old_parent = containers.get(child_id).and_then(|c| c.parent.clone());
    match old_parent {
        Some(ref old) if old == parent_id => return,
        Some(ref old) => {
            if let Some(old) = containers.get_mut(old.as_str()) {
                old.children.retain(|c| c != child_id);
            }
        }
        None => {}
    }

    if let Some(child) = containers.get_mut(child_id) {
        child.parent = Some(parent_id.to_string());
    }
    if let Some(parent) = containers.get_mut(parent_id) {
        if !parent.children.iter().any(|c| c == child_id) {
            parent.children.push(child_id.to_string());
        }
    }
}

/// Check if making `parent_id` the parent of `child_id` would create a cycle.
fn would_create_cycle(
    containers: &HashMap<String, Container>,
    parent_id: &str,
    child_id: &str,
) -> bool {
    let mut current = Some(parent_id.to_string());
    let mut depth = 0;
    while let Some(ref id) = current {
        if id == child_id {
            return true;
        }
        depth += 1;
        if depth > 1000 {
            return true;
        }
        current = containers.get(id.as_str()).and_then(|c| c.parent.clone());
    }
    false
}

/// Collect the message indices of a container and all its descendants.
fn collect(id: &str, containers: &HashMap<String, Container>, out: &mut Vec<usize>) {
    let mut stack = vec![id];
    while let Some(id) = stack.pop() {
        let Some(container) = containers.get(id) else {
            continue;
        };
        out.extend(container.message);
        stack.extend(container.children.iter().map(String::as_str));
    }
}

/// Normalize a subject for grouping: strip `Re:`/`Fwd:`/`Fw:` prefixes,
/// collapse whitespace, lowercase.
pub fn normalize_subject(subject: &str) -> String {
    let mut s = subject.trim();
    loop {
        let lower = s.to_ascii_lowercase();
        let prefix = ["re:", "fwd:", "fw:"]
            .iter()
            .find(|p| lower.starts_with(*p))
            .map(|p| p.len());
        match prefix {
            Some(len) => s = s[len..].trim_start(),
            None => break,
        }
    }
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
