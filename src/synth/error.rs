/// Why a note-on produced no voice. None of these are fatal and no units or
/// voices are taken. On the rhythm channel the played-note report and the cut
/// of an open drum may already have happened.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteDropped {
    #[error("no channel {0}")]
    InvalidChannel(u8),
    #[error("key {0} is outside the playable range")]
    InvalidKey(u8),
    #[error("key {0} has no drum mapped")]
    UnmappedKey(u8),
    #[error("timbre {0} is not in the sound bank")]
    MissingTimbre(usize),
    #[error("channel is silenced by a volume override")]
    Silenced,
    #[error("instrument is completely muted")]
    Muted,
    #[error("insufficient free partials: needed {needed}, free {free}")]
    InsufficientUnits { needed: usize, free: usize },
    #[error("no free poly")]
    NoFreeVoice,
    #[error("deferred event queue is full")]
    DeferQueueFull,
}
