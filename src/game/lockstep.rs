//! LockStep Frame Buffer
//!
//! Accumulates per-tick input into sparse frames keyed by frame index.
//! At most one input per player per frame; the frame counter only moves
//! forward until the buffer is reset at game start.

use std::collections::BTreeMap;

use crate::core::PlayerId;
use crate::protocol::{FrameData, InputData};

/// Inputs recorded for one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    index: u32,
    inputs: Vec<InputData>,
}

impl Frame {
    /// Create an empty frame.
    pub fn new(index: u32) -> Self {
        Self {
            index,
            inputs: Vec::new(),
        }
    }

    /// Frame index.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Inputs in arrival order.
    pub fn inputs(&self) -> &[InputData] {
        &self.inputs
    }

    /// Whether the player already has input in this frame.
    pub fn contains(&self, player_id: PlayerId) -> bool {
        self.inputs.iter().any(|input| input.player_id == player_id)
    }

    /// Add input unless the player already has some. Returns false on duplicate.
    pub fn push(&mut self, input: InputData) -> bool {
        if self.contains(input.player_id) {
            return false;
        }
        self.inputs.push(input);
        true
    }

    /// Wire representation.
    pub fn to_data(&self) -> FrameData {
        FrameData {
            frame_id: self.index,
            inputs: self.inputs.clone(),
        }
    }
}

/// Sparse frame buffer.
#[derive(Debug, Clone, Default)]
pub struct LockStep {
    frames: BTreeMap<u32, Frame>,
    frame_count: u32,
}

impl LockStep {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record input for the current frame. Duplicate input from the same
    /// player in one frame is rejected and returns false.
    pub fn push_command(&mut self, input: InputData) -> bool {
        let index = self.frame_count;
        self.frames
            .entry(index)
            .or_insert_with(|| Frame::new(index))
            .push(input)
    }

    /// Advance to the next frame and return the new frame count.
    pub fn tick(&mut self) -> u32 {
        self.frame_count += 1;
        self.frame_count
    }

    /// Number of ticks since the last reset.
    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    /// Frame at `index`, or `None` if no input was recorded for that tick.
    pub fn frame(&self, index: u32) -> Option<&Frame> {
        self.frames.get(&index)
    }

    /// Recorded frames in `[from, to]`, clamped to the frame count.
    pub fn range_frames(&self, from: u32, to: u32) -> Vec<&Frame> {
        let to = to.min(self.frame_count);
        if from > to {
            return Vec::new();
        }
        self.frames.range(from..=to).map(|(_, frame)| frame).collect()
    }

    /// Wire frames for the half-open range `[from, to)`, clamped to the
    /// frame count. The last index of the range is always present, empty
    /// if it had no input, so the receiver learns how far the game is.
    pub fn snapshot(&self, from: u32, to: u32) -> Vec<FrameData> {
        let to = to.min(self.frame_count);
        if from >= to {
            return Vec::new();
        }

        let last = to - 1;
        let mut frames: Vec<FrameData> = self
            .frames
            .range(from..=last)
            .map(|(_, frame)| frame.to_data())
            .collect();

        if frames.last().map(|f| f.frame_id) != Some(last) {
            frames.push(FrameData {
                frame_id: last,
                inputs: Vec::new(),
            });
        }
        frames
    }

    /// Drop all frames and restart counting from zero.
    pub fn reset(&mut self) {
        self.frames.clear();
        self.frame_count = 0;
    }
}
