//! Which editor events record a snapshot.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerKind {
    OnLoad,
    OnSave,
    OnClose,
    OnFocusLost,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::OnLoad => "on-load",
            TriggerKind::OnSave => "on-save",
            TriggerKind::OnClose => "on-close",
            TriggerKind::OnFocusLost => "on-focus-lost",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "on-load" => Ok(TriggerKind::OnLoad),
            "on-save" => Ok(TriggerKind::OnSave),
            "on-close" => Ok(TriggerKind::OnClose),
            "on-focus-lost" => Ok(TriggerKind::OnFocusLost),
            other => Err(format!("unknown save trigger: {}", other)),
        }
    }
}

/// Something that happened to a buffer in the front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorEvent {
    Load,
    Save,
    Close,
    FocusLost { dirty: bool },
}

/// Set of enabled triggers. Serialized as a list, e.g. `["on-save", "on-close"]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<TriggerKind>", into = "Vec<TriggerKind>")]
pub struct SaveTrigger {
    pub on_load: bool,
    pub on_save: bool,
    pub on_close: bool,
    pub on_focus_lost: bool,
}

impl Default for SaveTrigger {
    fn default() -> Self {
        Self::from(vec![TriggerKind::OnSave])
    }
}

impl SaveTrigger {
    pub fn fires_on(&self, event: EditorEvent) -> bool {
        match event {
            EditorEvent::Load => self.on_load,
            EditorEvent::Save => self.on_save,
            EditorEvent::Close => self.on_close,
            // Nothing new to record for a clean buffer.
            EditorEvent::FocusLost { dirty } => self.on_focus_lost && dirty,
        }
    }
}

impl From<Vec<TriggerKind>> for SaveTrigger {
    fn from(kinds: Vec<TriggerKind>) -> Self {
        Self {
            on_load: kinds.contains(&TriggerKind::OnLoad),
            on_save: kinds.contains(&TriggerKind::OnSave),
            on_close: kinds.contains(&TriggerKind::OnClose),
            on_focus_lost: kinds.contains(&TriggerKind::OnFocusLost),
        }
    }
}

impl From<SaveTrigger> for Vec<TriggerKind> {
    fn from(trigger: SaveTrigger) -> Self {
        [
            (trigger.on_load, TriggerKind::OnLoad),
            (trigger.on_save, TriggerKind::OnSave),
            (trigger.on_close, TriggerKind::OnClose),
            (trigger.on_focus_lost, TriggerKind::OnFocusLost),
        ]
        .into_iter()
        .filter_map(|(enabled, kind)| enabled.then_some(kind))
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, Serialize)]
    struct Wrapper {
        save_trigger: SaveTrigger,
    }

    #[test]
    fn test_default_is_on_save() {
        let trigger = SaveTrigger::default();
        assert!(trigger.fires_on(EditorEvent::Save));
        assert!(!trigger.fires_on(EditorEvent::Close));
        assert!(!trigger.fires_on(EditorEvent::Load));
    }

    #[test]
    fn test_focus_lost_needs_dirty_buffer() {
        let trigger = SaveTrigger::from(vec![TriggerKind::OnFocusLost]);
        assert!(trigger.fires_on(EditorEvent::FocusLost { dirty: true }));
        assert!(!trigger.fires_on(EditorEvent::FocusLost { dirty: false }));
    }

    #[test]
    fn test_toml_list() {
        let parsed: Wrapper = toml::from_str(r#"save_trigger = ["on-save", "on-close"]"#).unwrap();
        assert!(parsed.save_trigger.on_save && parsed.save_trigger.on_close);
        assert!(!parsed.save_trigger.on_focus_lost);

        let text = toml::to_string(&parsed).unwrap();
        assert!(text.contains(r#"save_trigger = ["on-save", "on-close"]"#));
    }

    #[test]
    fn test_from_str() {
        assert_eq!("On-Focus-Lost".parse::<TriggerKind>().unwrap(), TriggerKind::OnFocusLost);
        assert!("on-blur".parse::<TriggerKind>().is_err());
    }
}
