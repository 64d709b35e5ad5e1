//! Two gophers carry books from a pile to a fire, one cart at a time.
//!
//! The left gopher picks from the big pile and drops its load on the small
//! pile, the right gopher carries the small pile to the fire. Instead of
//! drawing sprites, the main task prints every change it observes between
//! scheduler turns.
//!
//! ```text
//! cargo run --example gophers -- 200
//! ```
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use tracing_subscriber::EnvFilter;
use warren::spawn;
use warren::sync::Chan;
use warren::task::yield_now;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Pick,
    Full,
    Shovel,
    Empty,
}

#[derive(Default)]
struct Sprite {
    x: Cell<f64>,
    y: Cell<f64>,
    state: Cell<Option<State>>,
}

impl Sprite {
    fn set(&self, state: State) {
        self.state.set(Some(state));
    }

    /// Bumps in the road.
    fn bump(&self, max: u32) {
        if self.y.get() > 0.0 {
            self.y.set(0.0);
        } else {
            self.y.set(f64::from(fastrand::u32(..max)));
        }
    }
}

impl fmt::Display for Sprite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state.get() {
            Some(state) => write!(f, "{state:?} at ({:.0}, {:.0})", self.x.get(), self.y.get()),
            None => write!(f, "idle"),
        }
    }
}

/// Gives up the processor `n` times.
async fn delay(n: u32) {
    for _ in 0..n {
        yield_now().await;
    }
}

async fn gopher(sprite: Rc<Sprite>, input: Chan<u32>, output: Chan<u32>) {
    while let Some(load) = pick_books(&sprite, &input).await {
        push_books(&sprite, load).await;
        fire_books(&sprite, load, &output).await;
        more_books(&sprite).await;
    }
}

async fn pick_books(sprite: &Sprite, input: &Chan<u32>) -> Option<u32> {
    sprite.set(State::Pick);
    sprite.x.set(0.0);
    let load = input.recv().await?;
    // heavier loads take longer to pick
    delay(load).await;
    Some(load)
}

async fn push_books(sprite: &Sprite, load: u32) {
    sprite.set(State::Full);
    sprite.x.set(0.0);
    while sprite.x.get() < 150.0 {
        sprite.bump(3);
        yield_now().await;
        sprite.x.set(sprite.x.get() + 10.0 / f64::from(load));
    }
    sprite.x.set(150.0);
    sprite.y.set(0.0);
}

async fn fire_books(sprite: &Sprite, load: u32, output: &Chan<u32>) {
    sprite.set(State::Shovel);
    delay(load).await;
    output.send(load).await;
}

async fn more_books(sprite: &Sprite) {
    sprite.set(State::Empty);
    while sprite.x.get() > 0.0 {
        sprite.x.set((sprite.x.get() - 10.0).max(0.0));
        sprite.bump(5);
        yield_now().await;
    }
    sprite.y.set(0.0);
}

async fn fill_big_pile(pile: Chan<u32>) {
    loop {
        pile.send(fastrand::u32(1..10)).await;
        yield_now().await;
    }
}

/// Burns everything that arrives.
async fn fire(oven: Chan<u32>, burnt: Rc<Cell<u32>>) {
    while let Some(load) = oven.recv().await {
        burnt.set(burnt.get() + load);
        yield_now().await;
    }
}

#[warren::main]
async fn main() {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let frames: u32 = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(500);

    // the left gopher starts with little work, so it moves fast
    let big_pile = Chan::new(1);
    big_pile.send(1).await;
    // and the right one with a lot, so it moves slow
    let small_pile = Chan::new(1);
    small_pile.send(10).await;
    let oven = Chan::new(1);

    let burnt = Rc::new(Cell::new(0));
    let left = Rc::new(Sprite::default());
    let right = Rc::new(Sprite::default());

    spawn(fire(oven.clone(), burnt.clone()));
    spawn(gopher(left.clone(), big_pile.clone(), small_pile.clone()));
    spawn(gopher(right.clone(), small_pile.clone(), oven));
    spawn(fill_big_pile(big_pile));

    let mut shown = (String::new(), String::new(), false);
    for frame in 0..frames {
        let now = (left.to_string(), right.to_string(), !small_pile.is_empty());
        if now != shown {
            let books = if now.2 { "books" } else { "empty" };
            println!("{frame:>5} | left: {:<24} | pile: {books:<5} | right: {}", now.0, now.1);
            shown = now;
        }
        yield_now().await;
    }
    println!("{} books burnt in {frames} frames", burnt.get());
}
