use log::info;
use parking_lot::RwLock;
use shared::GameObject;

/// Server-side copy of the shared game objects.
///
/// Replaced wholesale whenever a client uploads a server object list.
#[derive(Debug, Default)]
pub struct GameWorld {
    objects: RwLock<Vec<GameObject>>,
}

impl GameWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace_all(&self, objects: Vec<GameObject>) {
        let count = objects.len();
        *self.objects.write() = objects;
        info!("World now holds {} objects", count);
    }

    pub fn snapshot(&self) -> Vec<GameObject> {
        self.objects.read().clone()
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}
