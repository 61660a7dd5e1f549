pub mod moderation;
pub mod net;
pub mod phase;
pub mod player;
pub mod room;
pub mod session;
pub mod snapshot;
pub mod tally;
pub mod time;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers {
    use crate::player::PlayerId;
    use crate::room::RoomState;
    use crate::tally::RandomSource;

    /// Replays a fixed list of indices, wrapping around. Each value is
    /// reduced modulo the requested length.
    #[derive(Debug, Clone)]
    pub struct SequenceRandom {
        values: Vec<usize>,
        next: usize,
    }

    impl SequenceRandom {
        pub fn new(values: Vec<usize>) -> Self {
            assert!(!values.is_empty(), "SequenceRandom needs at least one value");
            Self { values, next: 0 }
        }
    }

    impl RandomSource for SequenceRandom {
        fn pick_index(&mut self, len: usize) -> usize {
            let v = self.values[self.next % self.values.len()];
            self.next += 1;
            v % len
        }
    }

    /// A lobby with `n` connected players `p1..pn` who joined in order.
    /// `p1` is host.
    pub fn room_with_players(n: usize) -> (RoomState, Vec<PlayerId>) {
        let mut room = RoomState::default();
        let ids: Vec<PlayerId> = (1..=n).map(|i| format!("p{i}")).collect();
        for (i, id) in ids.iter().enumerate() {
            room.upsert_player(id, i as i64 + 1);
            room.ensure_host(id);
        }
        (room, ids)
    }

    /// Assert that `text` decodes to a server message of the given tag.
    pub fn assert_kind(text: &str, kind: &str) {
        let msg = crate::net::protocol::decode_server_message(text)
            .unwrap_or_else(|e| panic!("undecodable server frame {text}: {e}"));
        assert_eq!(msg.kind(), kind, "unexpected frame: {text}");
    }
}
