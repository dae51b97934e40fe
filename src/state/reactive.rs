//! Push-based reactive cells.
//!
//! A [`Signal`] is a writable cell. A [`Computed`] is derived from an explicit
//! list of dependencies and carries a height one above its tallest
//! dependency. Writing a signal recomputes the affected derived cells in
//! height order, so every cell is recomputed at most once per write and only
//! after all of its inputs are up to date. Listeners run once the whole graph
//! is consistent and with no locks held, so a listener may write cells itself.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Anything a [`Computed`] can depend on.
pub trait Source {
    fn height(&self) -> usize;
    fn register(&self, dependent: Weak<dyn Node>);
}

/// A derived cell as seen by propagation.
pub trait Node: Send + Sync {
    fn height(&self) -> usize;
    /// Recompute from dependencies; true if the stored value changed.
    fn recompute(&self) -> bool;
    fn dependents(&self) -> Vec<Arc<dyn Node>>;
    fn notify(&self);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Dependents(Mutex<Vec<Weak<dyn Node>>>);

impl Dependents {
    fn add(&self, node: Weak<dyn Node>) {
        lock(&self.0).push(node);
    }

    /// Live dependents; dropped ones are pruned on the way.
    fn live(&self) -> Vec<Arc<dyn Node>> {
        let mut nodes = lock(&self.0);
        let mut live = Vec::with_capacity(nodes.len());
        nodes.retain(|weak| match weak.upgrade() {
            Some(node) => {
                live.push(node);
                true
            }
            None => false,
        });
        live
    }
}

struct Listeners<T>(Mutex<Vec<(SubscriptionId, Listener<T>)>>);

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self(Mutex::new(Vec::new()))
    }
}

impl<T> Listeners<T> {
    fn add(&self, listener: Listener<T>) -> SubscriptionId {
        let id = SubscriptionId(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed));
        lock(&self.0).push((id, listener));
        id
    }

    fn remove(&self, id: SubscriptionId) -> bool {
        let mut listeners = lock(&self.0);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    fn call(&self, value: &T) {
        // Snapshot first so listeners may (un)subscribe while running.
        let snapshot: Vec<Listener<T>> = lock(&self.0).iter().map(|(_, l)| l.clone()).collect();
        for listener in snapshot {
            listener(value);
        }
    }
}

fn node_key(node: &Arc<dyn Node>) -> usize {
    Arc::as_ptr(node) as *const () as usize
}

/// Recompute everything reachable from `roots`, lowest height first.
/// Returns the nodes whose value changed, in the order they were updated.
fn propagate(roots: Vec<Arc<dyn Node>>) -> Vec<Arc<dyn Node>> {
    let mut queue: BTreeMap<(usize, usize), Arc<dyn Node>> = BTreeMap::new();
    for node in roots {
        queue.insert((node.height(), node_key(&node)), node);
    }

    let mut changed = Vec::new();
    while let Some((_, node)) = queue.pop_first() {
        if node.recompute() {
            for dependent in node.dependents() {
                queue.insert((dependent.height(), node_key(&dependent)), dependent);
            }
            changed.push(node);
        }
    }
    changed
}

/// Writable reactive cell.
pub struct Signal<T> {
    inner: Arc<SignalInner<T>>,
}

struct SignalInner<T> {
    value: RwLock<T>,
    dependents: Dependents,
    listeners: Listeners<T>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Signal<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(SignalInner {
                value: RwLock::new(value),
                dependents: Dependents::default(),
                listeners: Listeners::default(),
            }),
        }
    }

    pub fn get(&self) -> T {
        self.with(T::clone)
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let value = self.inner.value.read().unwrap_or_else(PoisonError::into_inner);
        f(&value)
    }

    /// Store `value` and propagate. Writing an equal value is a no-op.
    /// Returns whether the value changed.
    pub fn set(&self, value: T) -> bool {
        {
            let mut current = self.inner.value.write().unwrap_or_else(PoisonError::into_inner);
            if *current == value {
                return false;
            }
            *current = value;
        }

        let changed = propagate(self.inner.dependents.live());
        let value = self.get();
        self.inner.listeners.call(&value);
        for node in changed {
            node.notify();
        }
        true
    }

    pub fn update(&self, f: impl FnOnce(&mut T)) -> bool {
        let mut value = self.get();
        f(&mut value);
        self.set(value)
    }

    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> SubscriptionId {
        self.inner.listeners.add(Arc::new(listener))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.listeners.remove(id)
    }
}

impl<T> Source for Signal<T> {
    fn height(&self) -> usize {
        0
    }

    fn register(&self, dependent: Weak<dyn Node>) {
        self.inner.dependents.add(dependent);
    }
}

/// Read-only cell derived from other cells.
pub struct Computed<T> {
    inner: Arc<ComputedInner<T>>,
}

struct ComputedInner<T> {
    value: RwLock<T>,
    compute: Box<dyn Fn() -> T + Send + Sync>,
    height: usize,
    dependents: Dependents,
    listeners: Listeners<T>,
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Computed<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Build a derived cell. `compute` must only read cells listed in `deps`;
    /// anything else it reads will not trigger a recompute.
    pub fn new(deps: &[&dyn Source], compute: impl Fn() -> T + Send + Sync + 'static) -> Self {
        let height = 1 + deps.iter().map(|d| d.height()).max().unwrap_or(0);
        let inner = Arc::new(ComputedInner {
            value: RwLock::new(compute()),
            compute: Box::new(compute),
            height,
            dependents: Dependents::default(),
            listeners: Listeners::default(),
        });

        let node: Arc<dyn Node> = inner.clone();
        for dep in deps {
            dep.register(Arc::downgrade(&node));
        }
        Self { inner }
    }

    pub fn get(&self) -> T {
        self.with(T::clone)
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let value = self.inner.value.read().unwrap_or_else(PoisonError::into_inner);
        f(&value)
    }

    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> SubscriptionId {
        self.inner.listeners.add(Arc::new(listener))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.listeners.remove(id)
    }
}

impl<T> Source for Computed<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn height(&self) -> usize {
        self.inner.height
    }

    fn register(&self, dependent: Weak<dyn Node>) {
        self.inner.dependents.add(dependent);
    }
}

impl<T> Node for ComputedInner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn height(&self) -> usize {
        self.height
    }

    fn recompute(&self) -> bool {
        let next = (self.compute)();
        let mut current = self.value.write().unwrap_or_else(PoisonError::into_inner);
        if *current == next {
            return false;
        }
        *current = next;
        true
    }

    fn dependents(&self) -> Vec<Arc<dyn Node>> {
        self.dependents.live()
    }

    fn notify(&self) {
        let value = self
            .value
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        self.listeners.call(&value);
    }
}
