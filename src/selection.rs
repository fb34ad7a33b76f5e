use std::collections::BTreeSet;

/// Row indices picked in the grid. Independent of record content and never
/// persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionSet {
    rows: BTreeSet<usize>,
}

impl SelectionSet {
    pub fn from_rows<I: IntoIterator<Item = usize>>(rows: I) -> Self {
        Self {
            rows: rows.into_iter().collect(),
        }
    }

    pub fn contains(&self, row: usize) -> bool {
        self.rows.contains(&row)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Ascending row order.
    pub fn iter(&self) -> impl Iterator<Item = &usize> {
        self.rows.iter()
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }

    fn set(&mut self, row: usize, selected: bool) {
        if selected {
            self.rows.insert(row);
        } else {
            self.rows.remove(&row);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerButton {
    Primary,
    Secondary,
    Middle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DragState {
    #[default]
    Idle,
    Dragging {
        anchor: usize,
        /// The state every row entered during this drag is set to.
        target_state: bool,
    },
}

/// Click, shift-click and drag selection over grid rows.
#[derive(Debug, Clone, Default)]
pub struct SelectionController {
    selection: SelectionSet,
    anchor: Option<usize>,
    drag: DragState,
}

impl SelectionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selection(&self) -> &SelectionSet {
        &self.selection
    }

    /// Mutable access for bulk actions, which clear the set on completion.
    pub fn selection_mut(&mut self) -> &mut SelectionSet {
        &mut self.selection
    }

    pub fn anchor(&self) -> Option<usize> {
        self.anchor
    }

    pub fn drag_state(&self) -> DragState {
        self.drag
    }

    pub fn is_selected(&self, row: usize) -> bool {
        self.selection.contains(row)
    }

    /// Toggles `row`. With `range` set and an anchor present, every row
    /// between the anchor and `row` takes `row`'s new state.
    pub fn click(&mut self, row: usize, range: bool) {
        let resulting = !self.selection.contains(row);

        match (range, self.anchor) {
            (true, Some(anchor)) => {
                let (lo, hi) = if anchor <= row {
                    (anchor, row)
                } else {
                    (row, anchor)
                };
                for r in lo..=hi {
                    self.selection.set(r, resulting);
                }
            }
            _ => {
                self.selection.set(row, resulting);
                self.anchor = Some(row);
            }
        }
    }

    /// Starts a drag on a primary-button press. Returns false when ignored.
    pub fn drag_start(&mut self, row: usize, button: PointerButton) -> bool {
        if button != PointerButton::Primary {
            return false;
        }

        let target_state = !self.selection.contains(row);
        self.selection.set(row, target_state);
        self.drag = DragState::Dragging {
            anchor: row,
            target_state,
        };
        true
    }

    pub fn drag_enter(&mut self, row: usize) {
        if let DragState::Dragging { target_state, .. } = self.drag {
            if self.selection.contains(row) != target_state {
                self.selection.set(row, target_state);
            }
            self.drag = DragState::Dragging {
                anchor: row,
                target_state,
            };
        }
    }

    /// Pointer released anywhere. Ends the drag without touching the selection.
    pub fn drag_end(&mut self) {
        self.drag = DragState::Idle;
    }

    pub fn select_all(&mut self, len: usize) {
        self.selection = SelectionSet::from_rows(0..len);
    }

    pub fn clear(&mut self) {
        self.selection.clear();
        self.anchor = None;
        self.drag = DragState::Idle;
    }

    /// Drops rows that no longer exist after the store shrank.
    pub fn retain_within(&mut self, len: usize) {
        self.selection.rows.retain(|&r| r < len);
        if self.anchor.is_some_and(|a| a >= len) {
            self.anchor = None;
        }
    }
}
