//! Per-macroblock scratchpads for the current and previous frame
//!
//! The model records, for every macroblock it walks, which coefficients
//! were significant and how many nonzeros each sub-block carried. Two
//! buffers rotate on frame-number changes so the previous frame's counts
//! stay available for temporal prediction.

use super::tables::SUB_BLOCKS_PER_MB;

/// Coefficients per sub-block slot. 8x8 blocks span four consecutive
/// slots, so their 64 coefficients fit the same flat layout.
pub const COEFFS_PER_SUB_BLOCK: usize = 16;

/// Residual scratch for one macroblock. Only the significance of each
/// coefficient is populated by the recode walk.
#[derive(Clone, Copy)]
pub struct MbBlock {
    pub residual: [i16; SUB_BLOCKS_PER_MB * COEFFS_PER_SUB_BLOCK],
}

impl MbBlock {
    fn new() -> Self {
        MbBlock {
            residual: [0; SUB_BLOCKS_PER_MB * COEFFS_PER_SUB_BLOCK],
        }
    }
}

/// Side metadata for one macroblock.
#[derive(Clone, Copy)]
pub struct MbMeta {
    /// Nonzero count per sub-block slot, indexed by scan8 index.
    pub num_nonzeros: [u8; SUB_BLOCKS_PER_MB],
    /// Whether the luma residual used the 8x8 transform.
    pub is_8x8: bool,
    /// Whether any sub-block of this macroblock was walked.
    pub coded: bool,
}

impl MbMeta {
    fn new() -> Self {
        MbMeta {
            num_nonzeros: [0; SUB_BLOCKS_PER_MB],
            is_8x8: false,
            coded: false,
        }
    }
}

impl Default for MbMeta {
    fn default() -> Self {
        MbMeta::new()
    }
}

/// One frame's worth of macroblock records, indexed `(x + y * width)`.
pub struct FrameBuffer {
    width: u32,
    height: u32,
    frame_num: i32,
    blocks: Vec<MbBlock>,
    meta: Vec<MbMeta>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        FrameBuffer {
            width: 0,
            height: 0,
            frame_num: -1,
            blocks: Vec::new(),
            meta: Vec::new(),
        }
    }

    /// Allocate (or reallocate) for a frame of `width` x `height`
    /// macroblocks and zero every record.
    pub fn init(&mut self, width: u32, height: u32) {
        let count = (width * height) as usize;
        self.width = width;
        self.height = height;
        self.blocks.clear();
        self.blocks.resize(count, MbBlock::new());
        self.meta.clear();
        self.meta.resize(count, MbMeta::new());
    }

    /// Zero every macroblock record, keeping the allocation.
    pub fn bzero(&mut self) {
        self.blocks.fill(MbBlock::new());
        self.meta.fill(MbMeta::new());
    }

    pub fn set_frame_num(&mut self, frame_num: i32) {
        self.frame_num = frame_num;
    }

    pub fn is_same_frame(&self, frame_num: i32) -> bool {
        self.frame_num == frame_num && self.width != 0 && self.height != 0
    }

    pub fn is_initialized(&self) -> bool {
        self.width != 0 && self.height != 0
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn at(&self, x: u32, y: u32) -> &MbBlock {
        &self.blocks[(x + y * self.width) as usize]
    }

    pub fn at_mut(&mut self, x: u32, y: u32) -> &mut MbBlock {
        &mut self.blocks[(x + y * self.width) as usize]
    }

    pub fn meta_at(&self, x: u32, y: u32) -> &MbMeta {
        &self.meta[(x + y * self.width) as usize]
    }

    pub fn meta_at_mut(&mut self, x: u32, y: u32) -> &mut MbMeta {
        &mut self.meta[(x + y * self.width) as usize]
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// The rotating current/previous frame pair.
pub struct FramePair {
    frames: [FrameBuffer; 2],
    current: usize,
}

impl FramePair {
    pub fn new() -> Self {
        FramePair {
            frames: [FrameBuffer::new(), FrameBuffer::new()],
            current: 0,
        }
    }

    /// Called at every frame header. Rotates and clears the buffers when
    /// the frame number changes; reallocates when the dimensions change.
    pub fn frame_spec(&mut self, frame_num: i32, mb_width: u32, mb_height: u32) {
        if self.frames[self.current].is_same_frame(frame_num)
            && self.frames[self.current].width() == mb_width
            && self.frames[self.current].height() == mb_height
        {
            return;
        }
        self.current = 1 - self.current;
        let frame = &mut self.frames[self.current];
        if frame.width() == mb_width && frame.height() == mb_height {
            frame.bzero();
        } else {
            frame.init(mb_width, mb_height);
        }
        frame.set_frame_num(frame_num);
    }

    pub fn current(&self) -> &FrameBuffer {
        &self.frames[self.current]
    }

    pub fn current_mut(&mut self) -> &mut FrameBuffer {
        &mut self.frames[self.current]
    }

    pub fn previous(&self) -> &FrameBuffer {
        &self.frames[1 - self.current]
    }
}

impl Default for FramePair {
    fn default() -> Self {
        Self::new()
    }
}
