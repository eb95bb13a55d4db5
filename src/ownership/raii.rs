use indexmap::IndexMap;

pub type ResourceId = u64;

/// Called with the resource name when the resource is released.
pub type Destructor = Box<dyn FnOnce(&str) + Send>;

/// A tracked resource whose destructor runs at most once, on the first
/// `release` or on drop.
pub struct RaiiResource {
    id: ResourceId,
    name: String,
    acquired_at: usize,
    destructor: Option<Destructor>,
    acquired: bool,
}

impl RaiiResource {
    pub fn new(id: ResourceId, name: &str, line: usize, destructor: Option<Destructor>) -> Self {
        Self {
            id,
            name: name.to_string(),
            acquired_at: line,
            destructor,
            acquired: true,
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn acquired_at(&self) -> usize {
        self.acquired_at
    }

    pub fn is_acquired(&self) -> bool {
        self.acquired
    }

    pub fn release(&mut self) {
        if !self.acquired {
            return;
        }
        self.acquired = false;
        if let Some(destructor) = self.destructor.take() {
            destructor(&self.name);
        }
    }
}

impl Drop for RaiiResource {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for RaiiResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RaiiResource")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("acquired_at", &self.acquired_at)
            .field("acquired", &self.acquired)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct RaiiManager {
    resources: IndexMap<ResourceId, RaiiResource>,
    next_id: ResourceId,
}

impl RaiiManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&mut self, name: &str, destructor: Option<Destructor>, line: usize) -> ResourceId {
        self.next_id += 1;
        let id = self.next_id;
        self.resources
            .insert(id, RaiiResource::new(id, name, line, destructor));
        id
    }

    pub fn get(&self, id: ResourceId) -> Option<&RaiiResource> {
        self.resources.get(&id)
    }

    /// Releases and forgets `id`. Returns `false` if it was not held.
    pub fn release(&mut self, id: ResourceId) -> bool {
        match self.resources.shift_remove(&id) {
            Some(mut resource) => {
                resource.release();
                true
            }
            None => false,
        }
    }

    /// Releases everything, in acquisition order.
    pub fn release_all(&mut self) {
        for (_, mut resource) in self.resources.drain(..) {
            resource.release();
        }
    }

    pub fn active_count(&self) -> usize {
        self.resources
            .values()
            .filter(|resource| resource.is_acquired())
            .count()
    }

    /// Acquires a resource that is released when the returned guard drops.
    pub fn scope(&mut self, name: &str, destructor: Option<Destructor>, line: usize) -> RaiiGuard<'_> {
        let id = self.acquire(name, destructor, line);
        RaiiGuard { manager: self, id }
    }
}

pub struct RaiiGuard<'a> {
    manager: &'a mut RaiiManager,
    id: ResourceId,
}

impl RaiiGuard<'_> {
    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn manager(&self) -> &RaiiManager {
        self.manager
    }
}

impl Drop for RaiiGuard<'_> {
    fn drop(&mut self) {
        self.manager.release(self.id);
    }
}
