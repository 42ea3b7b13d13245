//! Keyboard state and viewer key bindings.

use std::collections::HashSet;

pub use winit::keyboard::KeyCode;

/// Viewer commands bound to keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewerAction {
    Quit,
    ToggleOrbit,
    CycleToneMapping,
    ExposureUp,
    ExposureDown,
}

impl ViewerAction {
    /// Fixed key bindings.
    pub fn from_key(key: KeyCode) -> Option<Self> {
        match key {
            KeyCode::Escape => Some(Self::Quit),
            KeyCode::Space => Some(Self::ToggleOrbit),
            KeyCode::KeyT => Some(Self::CycleToneMapping),
            KeyCode::Equal | KeyCode::NumpadAdd => Some(Self::ExposureUp),
            KeyCode::Minus | KeyCode::NumpadSubtract => Some(Self::ExposureDown),
            _ => None,
        }
    }
}

/// Tracks pressed keys between frames.
#[derive(Debug, Default)]
pub struct InputState {
    pressed_keys: HashSet<KeyCode>,
    just_pressed_keys: Vec<KeyCode>,
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears per-frame state. Call once per frame after handling actions.
    pub fn begin_frame(&mut self) {
        self.just_pressed_keys.clear();
    }

    /// Records a press. Auto-repeat presses of a held key are ignored.
    pub fn on_key_pressed(&mut self, key: KeyCode) {
        if self.pressed_keys.insert(key) {
            self.just_pressed_keys.push(key);
        }
    }

    pub fn on_key_released(&mut self, key: KeyCode) {
        self.pressed_keys.remove(&key);
    }

    pub fn is_key_pressed(&self, key: KeyCode) -> bool {
        self.pressed_keys.contains(&key)
    }

    pub fn is_key_just_pressed(&self, key: KeyCode) -> bool {
        self.just_pressed_keys.contains(&key)
    }

    /// Actions triggered since the last [`InputState::begin_frame`], in press
    /// order.
    pub fn actions(&self) -> impl Iterator<Item = ViewerAction> + '_ {
        self.just_pressed_keys
            .iter()
            .filter_map(|&key| ViewerAction::from_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_bindings() {
        assert_eq!(ViewerAction::from_key(KeyCode::Escape), Some(ViewerAction::Quit));
        assert_eq!(
            ViewerAction::from_key(KeyCode::KeyT),
            Some(ViewerAction::CycleToneMapping)
        );
        assert_eq!(
            ViewerAction::from_key(KeyCode::NumpadSubtract),
            Some(ViewerAction::ExposureDown)
        );
        assert_eq!(ViewerAction::from_key(KeyCode::KeyW), None);
    }

    #[test]
    fn test_held_key_triggers_once() {
        let mut input = InputState::new();
        input.on_key_pressed(KeyCode::Space);
        input.on_key_pressed(KeyCode::Space);
        assert_eq!(input.actions().count(), 1);

        input.begin_frame();
        input.on_key_pressed(KeyCode::Space);
        assert_eq!(input.actions().count(), 0);
        assert!(input.is_key_pressed(KeyCode::Space));
    }

    #[test]
    fn test_actions_in_press_order() {
        let mut input = InputState::new();
        input.on_key_pressed(KeyCode::Equal);
        input.on_key_pressed(KeyCode::KeyQ);
        input.on_key_pressed(KeyCode::KeyT);
        let actions: Vec<_> = input.actions().collect();
        assert_eq!(
            actions,
            vec![ViewerAction::ExposureUp, ViewerAction::CycleToneMapping]
        );
    }

    #[test]
    fn test_release_rearms_key() {
        let mut input = InputState::new();
        input.on_key_pressed(KeyCode::KeyT);
        input.begin_frame();
        input.on_key_released(KeyCode::KeyT);
        input.on_key_pressed(KeyCode::KeyT);
        assert!(input.is_key_just_pressed(KeyCode::KeyT));
    }
}
