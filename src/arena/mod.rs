// Arena-based storage for the engine's bookkeeping.
//
// Two slab-backed arenas, both owned by the store instance rather than by
// process-global statics:
// - Channel arena: one entry per observed property (uid + subscriber set)
// - Subscriber arena: one entry per dependent evaluator (expression,
//   cached value, dependency set, change callback)
//
// ChannelId and SubscriberId are lightweight newtypes over slab indices.

// channel_arena depends on SubscriberId, so subscriber_arena is declared
// first.
pub(crate) mod subscriber_arena;

pub(crate) mod channel_arena;

pub(crate) use channel_arena::{ChannelArena, ChannelId};
pub(crate) use subscriber_arena::{SubscriberArena, SubscriberId, SubscriberMetadata};
