//! Rebuilding bounded multi-modal chat histories from the step log.

use serde::{Deserialize, Serialize};

use crate::model::{ContentBlock, Message, Role};

use super::record::HistoryRecord;
use super::store::HistoryStore;

/// Replaces the text of every user message except the latest.
pub const PLACEHOLDER: &str =
    "Observation omitted for previous steps. See attachment for screenshot.";

/// Removed from a message's text when its screenshot is clipped.
pub const CLIP_HINT: &str = "See attachment for screenshot.";

/// Task-intro messages start with this...
pub const INTRO_PREFIX: &str = "Now given a task:";

/// ...and keep everything before this marker when compressed.
pub const INTRO_MARKER: &str = "Screenshot of current viewpoint:";

/// Appended to the latest user message when the model just answered.
pub const ANSWER_REMINDER: &str = "Important: You returned an answer in the last step. \
Let's pause, check the web page, and think again. If you still think the task is finished, \
double-check your answer, revise it if need, and return a final answer. If not, continue the task.";

const ANSWER_MARKERS: [&str; 2] = ["Action: ANSWER", "Action:\nANSWER"];

/// Which records feed a rebuilt history and how the image budget applies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryWindow {
    /// Every record; the latest user message is never clipped and the image
    /// budget covers only the older messages.
    #[default]
    Full,
    /// The last `history_length` records; the budget covers every user
    /// message including the latest.
    Recent,
}

impl HistoryStore {
    /// One chronological message list per instance, built fresh from the log.
    ///
    /// Older user messages are compressed to [`PLACEHOLDER`], at most
    /// `max_images` screenshots survive (oldest dropped first), and an
    /// [`ANSWER_REMINDER`] is added when the model answered on the previous
    /// turn. `history_length` only matters for [`HistoryWindow::Recent`].
    pub fn build_message_history(
        &self,
        history_length: usize,
        max_images: usize,
    ) -> Vec<Vec<Message>> {
        self.logs()
            .iter()
            .map(|log| {
                let records = match self.window {
                    HistoryWindow::Full => &log[..],
                    HistoryWindow::Recent => &log[log.len().saturating_sub(history_length)..],
                };
                build_one(records, max_images, self.window)
            })
            .collect()
    }
}

fn build_one(records: &[HistoryRecord], max_images: usize, window: HistoryWindow) -> Vec<Message> {
    let mut messages = Vec::with_capacity(records.len() * 2);
    for rec in records {
        if let Some(text) = rec.non_empty_str("assistant_text") {
            messages.push(Message::with_blocks(
                Role::Assistant,
                vec![ContentBlock::text(text)],
            ));
        }
        let mut blocks = vec![ContentBlock::text(rec.render("user_text"))];
        if let Some(path) = rec.non_empty_str("image_path") {
            blocks.push(ContentBlock::image_path(path));
        }
        messages.push(Message::with_blocks(Role::User, blocks));
    }

    let user_idx: Vec<usize> = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.role == Role::User)
        .map(|(i, _)| i)
        .collect();
    let Some((&latest, older)) = user_idx.split_last() else {
        return messages;
    };

    for &i in older {
        if let Some(text) = messages[i].leading_text_mut() {
            compress(text);
        }
    }

    match window {
        HistoryWindow::Full => {
            let budget = max_images.saturating_sub(messages[latest].image_count());
            clip_images(&mut messages, older, budget);
        }
        HistoryWindow::Recent => clip_images(&mut messages, &user_idx, max_images),
    }

    remind_after_answer(&mut messages, latest);
    messages
}

fn compress(text: &mut String) {
    if text == PLACEHOLDER {
        return;
    }
    *text = match text.find(INTRO_MARKER) {
        Some(pos) if text.starts_with(INTRO_PREFIX) => {
            format!("{}\n{PLACEHOLDER}", text[..pos].trim_end())
        }
        _ => PLACEHOLDER.to_string(),
    };
}

/// Drop the oldest images among `candidates` until at most `budget` remain.
fn clip_images(messages: &mut [Message], candidates: &[usize], budget: usize) {
    let total: usize = candidates.iter().map(|&i| messages[i].image_count()).sum();
    let mut excess = total.saturating_sub(budget);
    for &i in candidates {
        while excess > 0 && remove_first_image(&mut messages[i]) {
            if let Some(text) = messages[i].leading_text_mut() {
                *text = text.replace(CLIP_HINT, "").trim().to_string();
            }
            excess -= 1;
        }
        if excess == 0 {
            break;
        }
    }
}

fn remove_first_image(message: &mut Message) -> bool {
    let crate::model::Content::Blocks(blocks) = &mut message.content else {
        return false;
    };
    match blocks.iter().position(ContentBlock::is_image) {
        Some(pos) => {
            blocks.remove(pos);
            true
        }
        None => false,
    }
}

fn remind_after_answer(messages: &mut [Message], latest_user: usize) {
    let answered = messages[..latest_user]
        .iter()
        .rev()
        .find(|m| m.role == Role::Assistant)
        .and_then(Message::leading_text)
        .is_some_and(|t| ANSWER_MARKERS.iter().any(|m| t.contains(m)));
    if answered {
        if let Some(text) = messages[latest_user].leading_text_mut() {
            text.push_str("\n\n");
            text.push_str(ANSWER_REMINDER);
        }
    }
}
