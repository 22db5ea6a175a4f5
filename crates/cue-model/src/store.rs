//! Style store: an explicit, reducer-driven owner of the current style.
//!
//! Editors dispatch [`StyleAction`]s; subscribers are told about every new
//! state. The render pipeline only ever sees a cloned snapshot.

use crate::style::{Alignment, BackgroundStyle, FontOverride, RenderStyle, Rgba};

/// Every edit a style editor can make.
#[derive(Debug, Clone, PartialEq)]
pub enum StyleAction {
    SetPosition { x: f32, y: f32 },
    SetBlockSize { width: f32, height: f32 },
    SetFontFamily(String),
    SetFontWeight(u16),
    SetFontSize(f32),
    SetFill(Rgba),
    SetStroke { color: Rgba, width: f32 },
    SetAlignment(Alignment),
    SetBackground(Option<BackgroundStyle>),
    /// Turn word animation on with defaults, or off.
    EnableWordAnimation(bool),
    SetPop { enabled: bool, scale: f32 },
    SetSlide { enabled: bool, duration_fraction: f32 },
    SetHighlight(Option<BackgroundStyle>),
    SetFontOverride(Option<FontOverride>),
    /// Replace the whole style.
    Replace(RenderStyle),
}

/// Apply one action to a style, producing the next style.
pub fn reduce(state: &RenderStyle, action: StyleAction) -> RenderStyle {
    let mut next = state.clone();
    match action {
        StyleAction::SetPosition { x, y } => {
            next.x = x;
            next.y = y;
        }
        StyleAction::SetBlockSize { width, height } => {
            next.width = width.max(1.0);
            next.height = height.max(0.0);
        }
        StyleAction::SetFontFamily(family) => next.font.family = family,
        StyleAction::SetFontWeight(weight) => next.font.weight = weight.clamp(100, 900),
        StyleAction::SetFontSize(size) => next.font.size = size.max(1.0),
        StyleAction::SetFill(color) => next.fill = color,
        StyleAction::SetStroke { color, width } => {
            next.stroke = color;
            next.stroke_width = width.max(0.0);
        }
        StyleAction::SetAlignment(align) => next.align = align,
        StyleAction::SetBackground(background) => next.background = background,
        StyleAction::EnableWordAnimation(enabled) => {
            next.word_animation = match (enabled, next.word_animation.take()) {
                (true, Some(existing)) => Some(existing),
                (true, None) => Some(Default::default()),
                (false, _) => None,
            };
        }
        StyleAction::SetPop { enabled, scale } => {
            let anim = next.word_animation.get_or_insert_with(Default::default);
            anim.pop_enabled = enabled;
            anim.pop_scale = scale.max(0.01);
        }
        StyleAction::SetSlide {
            enabled,
            duration_fraction,
        } => {
            let anim = next.word_animation.get_or_insert_with(Default::default);
            anim.slide_enabled = enabled;
            anim.slide_duration_fraction = duration_fraction.clamp(0.0, 1.0);
        }
        StyleAction::SetHighlight(highlight) => {
            next.word_animation
                .get_or_insert_with(Default::default)
                .highlight = highlight;
        }
        StyleAction::SetFontOverride(font_override) => {
            next.word_animation
                .get_or_insert_with(Default::default)
                .font_override = font_override;
        }
        StyleAction::Replace(style) => next = style,
    }
    next
}

/// Handle returned by [`StyleStore::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Box<dyn Fn(&RenderStyle) + Send + Sync>;

/// Owner of the current style.
pub struct StyleStore {
    state: RenderStyle,
    listeners: Vec<(SubscriptionId, Listener)>,
    next_id: u64,
}

impl StyleStore {
    pub fn new(initial: RenderStyle) -> Self {
        Self {
            state: initial,
            listeners: Vec::new(),
            next_id: 0,
        }
    }

    /// Current state.
    pub fn get(&self) -> &RenderStyle {
        &self.state
    }

    /// Owned copy for handing to a render.
    pub fn snapshot(&self) -> RenderStyle {
        self.state.clone()
    }

    /// Reduce `action` into a new state and notify subscribers.
    pub fn dispatch(&mut self, action: StyleAction) {
        tracing::trace!(?action, "Style action");
        let next = reduce(&self.state, action);
        if next == self.state {
            return;
        }
        self.state = next;
        for (_, listener) in &self.listeners {
            listener(&self.state);
        }
    }

    pub fn subscribe(
        &mut self,
        listener: impl Fn(&RenderStyle) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(existing, _)| *existing != id);
        self.listeners.len() != before
    }
}

impl std::fmt::Debug for StyleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StyleStore")
            .field("state", &self.state)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_reduce_is_pure() {
        let style = RenderStyle::default_for(1280, 720);
        let next = reduce(&style, StyleAction::SetFontSize(64.0));
        assert_eq!(next.font.size, 64.0);
        assert_eq!(style.font.size, 40.0);
    }

    #[test]
    fn test_reduce_clamps() {
        let style = RenderStyle::default_for(1280, 720);
        let next = reduce(
            &style,
            StyleAction::SetSlide {
                enabled: true,
                duration_fraction: 4.0,
            },
        );
        let anim = next.word_animation.unwrap();
        assert!(anim.slide_enabled);
        assert_eq!(anim.slide_duration_fraction, 1.0);
        assert_eq!(reduce(&style, StyleAction::SetFontWeight(20)).font.weight, 100);
    }

    #[test]
    fn test_enable_word_animation_keeps_existing_settings() {
        let style = RenderStyle::default_for(640, 360);
        let on = reduce(&style, StyleAction::SetPop { enabled: false, scale: 1.3 });
        let still_on = reduce(&on, StyleAction::EnableWordAnimation(true));
        assert_eq!(still_on.word_animation.as_ref().unwrap().pop_scale, 1.3);
        let off = reduce(&still_on, StyleAction::EnableWordAnimation(false));
        assert!(off.word_animation.is_none());
    }

    #[test]
    fn test_subscribers_notified_on_change_only() {
        let mut store = StyleStore::new(RenderStyle::default_for(1280, 720));
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let id = store.subscribe(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        store.dispatch(StyleAction::SetAlignment(Alignment::Left));
        store.dispatch(StyleAction::SetAlignment(Alignment::Left));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.get().align, Alignment::Left);

        assert!(store.unsubscribe(id));
        assert!(!store.unsubscribe(id));
        store.dispatch(StyleAction::SetAlignment(Alignment::Right));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
