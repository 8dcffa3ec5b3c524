use crate::channel::Channel;

#[derive(Clone)]
pub struct AppState {
    pub channel: Channel,
}

impl AppState {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }
}
