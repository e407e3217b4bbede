#![no_std]
#![no_main]

use pets::{Mutex, Queue, Semaphore, Status, Timer, TimerMode};

use defmt_semihosting as _;

const SYSTICKS_PER_SCHED_TICK: u32 = 100_000;

/// Guards access to the shared food bowl.
static FOOD_BOWL: Mutex = Mutex::new();
/// How many treats are currently in the jar.
static TREATS: Semaphore = Semaphore::new();

/// Holds the queue handle `Queue::create` hands back at boot, since `Queue`
/// itself has no `const fn new()` (its buffer size is a runtime parameter).
struct MewQueueSlot(core::cell::UnsafeCell<Option<&'static Queue>>);

// Safety: written exactly once from `main`, before the scheduler (and thus
// any task) can observe it; read-only from then on.
unsafe impl Sync for MewQueueSlot {}

static MEW_QUEUE: MewQueueSlot = MewQueueSlot(core::cell::UnsafeCell::new(None));

#[cortex_m_rt::entry]
fn main() -> ! {
    let cp = cortex_m::Peripherals::take().unwrap();
    defmt::info!("Hello!");

    let status = pets::init();
    assert_eq!(status, Status::Success);

    FOOD_BOWL.init();
    TREATS.init(0, 3);

    let queue = Queue::create(4, 4).unwrap();
    // Safety: single write, before the scheduler (and thus any other task)
    // can observe `MEW_QUEUE`.
    unsafe {
        *MEW_QUEUE.0.get() = Some(queue);
    }

    pets::task_create(rabbits, Some("rabbits"), 0, 0, 2).unwrap();
    pets::task_create(hamsters, Some("hamsters"), 0, 0, 2).unwrap();
    pets::task_create(cats, Some("cats"), 0, 0, 3).unwrap();

    let feeding_timer = Timer::create(Some("feeding"), 500, TimerMode::AutoReload, on_feeding_time, 0).unwrap();
    feeding_timer.start();

    pets::start_scheduler(cp.SYST, SYSTICKS_PER_SCHED_TICK);
}

/// Fired from tick context every 500 ticks: tops up the treat supply.
fn on_feeding_time(_timer: &Timer, _param: usize) {
    let _ = TREATS.signal();
}

fn mew_queue() -> &'static Queue {
    // Safety: set once in `main` before any task runs.
    unsafe { (*MEW_QUEUE.0.get()).expect("queue created in main before tasks start") }
}

fn rabbits(_param: usize) -> ! {
    loop {
        if FOOD_BOWL.lock(pets::config::MAX_WAIT) == Status::Success {
            defmt::info!("Rabbit! (back in 5)");
            FOOD_BOWL.unlock();
        }
        pets::delay_ticks(5);
    }
}

fn hamsters(_param: usize) -> ! {
    loop {
        match TREATS.wait(20) {
            Status::Success => defmt::info!("Hamster got a treat!"),
            _ => defmt::info!("Hamster! (back in 10)"),
        }
        pets::delay_ticks(10);
    }
}

fn cats(_param: usize) -> ! {
    let mut mew_count: u32 = 0;
    loop {
        mew_count = mew_count.wrapping_add(1);
        let _ = mew_queue().send(&mew_count.to_le_bytes(), 0);
        defmt::info!("Cat! (back in 3)");
        pets::delay_ticks(3);
    }
}
