//! Evaluation harness for the two allocator variants.
//!
//! Runs a stability loop, a placement probe and capacity probes against a
//! heap of the requested size and prints colored verdicts. The region size
//! can be passed as the single positional argument; it defaults to 1 MiB.

use std::env;
use std::process;
use std::time::{Duration, Instant};

use log::{LevelFilter, Metadata, Record};
use tagheap::{CompactingHeap, Handle, Heap, DEFAULT_CAPACITY};

const BLUE: &str = "\x1b[34m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

const ITERATIONS: usize = 1_000_000;

bitflags::bitflags! {
    /// Failure modes accumulated by a probe.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Failure: u32 {
        const OUT_OF_MEMORY = 1;
        const DATA_MISMATCH = 1 << 1;
        const MISALIGNED = 1 << 2;
        const PLACEMENT = 1 << 3;
    }
}

/// Minimal stderr sink for the library's `log` output.
struct StderrLogger;

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::Level::Info
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

fn main() {
    let _ = log::set_logger(&LOGGER).map(|()| log::set_max_level(LevelFilter::Info));

    let mut args = env::args();
    let program = args.next().unwrap_or_else(|| "tagheap".into());
    let capacity = match (args.next(), args.next()) {
        (None, _) => DEFAULT_CAPACITY,
        (Some(size), None) => match size.parse() {
            Ok(size) => size,
            Err(_) => usage(&program),
        },
        (Some(_), Some(_)) => usage(&program),
    };

    println!("Evaluating a heap of {} KBs...", capacity / 1024);

    let mut heap = Heap::new(capacity);

    println!("\nTest 1 - Stability and consistency:");
    let (failure, alloc_time, free_time) = direct_stability(&mut heap);
    print_result(failure);
    print_timing(alloc_time, free_time);

    println!("\nTest 2 - First-fit policy:");
    print_result(direct_first_fit(&mut heap));

    println!("\nTest 3 - Max allocation size:");
    println!("[{BLUE}{} KB{RESET}]", direct_max_size(&mut heap) >> 10);

    println!("\nHeap checker:\n{}", heap.report());

    let mut heap = CompactingHeap::new(capacity);

    println!("\nTest 4 - Stability and consistency (compacting):");
    let (failure, alloc_time, free_time) = compacting_stability(&mut heap);
    print_result(failure);
    print_timing(alloc_time, free_time);

    println!("\nTest 5 - Max # of 1 byte allocations (compacting):");
    let (count, failure) = compacting_max_allocations(&mut heap);
    print_result(failure);
    println!("[{BLUE}{count}{RESET}]");

    println!("\nHeap checker:\n{}", heap.report());
}

fn usage(program: &str) -> ! {
    eprintln!("Usage: {program} [memory area size in bytes]");
    process::exit(1);
}

fn print_result(failure: Failure) {
    if failure.is_empty() {
        println!("[{BLUE}Passed{RESET}]");
        return;
    }
    let mut reasons = String::new();
    if failure.contains(Failure::OUT_OF_MEMORY) {
        reasons.push_str("<OUT_OF_MEM>");
    }
    if failure.contains(Failure::DATA_MISMATCH) {
        reasons.push_str("<DATA_INCONSISTENCY>");
    }
    if failure.contains(Failure::MISALIGNED) {
        reasons.push_str("<ALIGNMENT>");
    }
    if failure.contains(Failure::PLACEMENT) {
        reasons.push_str("<NOT_FIRST_FIT>");
    }
    println!("[{RED}Failed{RESET}] due to: {reasons}");
}

fn print_timing(alloc_time: Duration, free_time: Duration) {
    println!(
        "Average time for a Malloc request: {} ns",
        alloc_time.as_nanos() / ITERATIONS as u128
    );
    println!(
        "Average time for a Free request: {} ns",
        free_time.as_nanos() / ITERATIONS as u128
    );
    println!(
        "Total time for {} Malloc/Free requests: {} ms",
        ITERATIONS,
        (alloc_time + free_time).as_millis()
    );
}

/// Put two copies of a running string and read both back, a million times.
fn direct_stability(heap: &mut Heap) -> (Failure, Duration, Duration) {
    let mut failure = Failure::empty();
    let mut alloc_time = Duration::ZERO;
    let mut free_time = Duration::ZERO;

    for i in 0..ITERATIONS {
        let data = format!("String 1, the current count is {i}\n");
        let started = Instant::now();
        let addr1 = heap.put(data.as_bytes());
        alloc_time += started.elapsed();
        let addr2 = heap.put(data.as_bytes());

        let (Some(addr1), Some(addr2)) = (addr1, addr2) else {
            failure |= Failure::OUT_OF_MEMORY;
            break;
        };
        if addr1.offset() % 8 != 0 || addr2.offset() % 8 != 0 {
            failure |= Failure::MISALIGNED;
        }

        let mut buf = vec![0_u8; data.len()];
        let started = Instant::now();
        heap.get(&mut buf, addr2);
        free_time += started.elapsed();
        if buf != data.as_bytes() {
            failure |= Failure::DATA_MISMATCH;
        }
        heap.get(&mut buf, addr1);
        if buf != data.as_bytes() {
            failure |= Failure::DATA_MISMATCH;
        }
    }
    (failure, alloc_time, free_time)
}

/// The four-round placement probe: consecutive bumps, hole reuse, and two
/// merge checks.
fn direct_first_fit(heap: &mut Heap) -> Failure {
    let mut failure = Failure::empty();

    // Round 1 - two consecutive allocations land one after the other
    let Some(v1) = heap.alloc(8) else {
        return Failure::OUT_OF_MEMORY;
    };
    let Some(v2) = heap.alloc(4) else {
        return Failure::OUT_OF_MEMORY;
    };
    if v1 >= v2 {
        failure |= Failure::PLACEMENT;
    }
    if v1.offset() % 8 != 0 || v2.offset() % 8 != 0 {
        failure |= Failure::MISALIGNED;
    }

    // Round 2 - a fitting request reuses the hole at the bottom
    heap.free(v1);
    let Some(v3) = heap.alloc(64) else {
        return Failure::OUT_OF_MEMORY;
    };
    let Some(v4) = heap.alloc(5) else {
        return Failure::OUT_OF_MEMORY;
    };
    if v4 != v1 || v3 < v2 {
        failure |= Failure::PLACEMENT;
    }
    if v3.offset() % 8 != 0 || v4.offset() % 8 != 0 {
        failure |= Failure::MISALIGNED;
    }

    // Round 3 - merged holes are found by their base
    heap.free(v4);
    heap.free(v2);
    let Some(v4) = heap.alloc(10) else {
        return Failure::OUT_OF_MEMORY;
    };
    if v4 != v1 {
        failure |= Failure::PLACEMENT;
    }

    // Round 4 - freeing the rest drains the region back to its base
    heap.free(v4);
    heap.free(v3);
    let Some(v4) = heap.alloc(256) else {
        return Failure::OUT_OF_MEMORY;
    };
    if v4 != v1 {
        failure |= Failure::PLACEMENT;
    }
    heap.free(v4);
    failure
}

/// Probe exponentially shrinking sizes and report the largest success.
fn direct_max_size(heap: &mut Heap) -> usize {
    let mut size = 4 * 1024 * 1024;
    while size > 0 {
        if let Some(addr) = heap.alloc(size) {
            heap.free(addr);
            return size;
        }
        size >>= 1;
    }
    0
}

/// The stability loop through the redirection table.
fn compacting_stability(heap: &mut CompactingHeap) -> (Failure, Duration, Duration) {
    let mut failure = Failure::empty();
    let mut alloc_time = Duration::ZERO;
    let mut free_time = Duration::ZERO;

    for i in 0..ITERATIONS {
        let data = format!("String 1, the current count is {i}\n");
        let started = Instant::now();
        let handle1 = heap.put(data.as_bytes());
        alloc_time += started.elapsed();
        let handle2 = heap.put(data.as_bytes());

        let (Some(handle1), Some(handle2)) = (handle1, handle2) else {
            failure |= Failure::OUT_OF_MEMORY;
            break;
        };
        for handle in [handle1, handle2] {
            match heap.resolve(handle) {
                Some(addr) if addr.offset() % 8 == 0 => {}
                _ => failure |= Failure::MISALIGNED,
            }
        }

        let mut buf = vec![0_u8; data.len()];
        let started = Instant::now();
        heap.get(&mut buf, handle2);
        free_time += started.elapsed();
        if buf != data.as_bytes() {
            failure |= Failure::DATA_MISMATCH;
        }
        heap.get(&mut buf, handle1);
        if buf != data.as_bytes() {
            failure |= Failure::DATA_MISMATCH;
        }
    }
    (failure, alloc_time, free_time)
}

/// Fill the heap with 1-byte payloads, then drain it and verify every byte.
fn compacting_max_allocations(heap: &mut CompactingHeap) -> (usize, Failure) {
    let mut failure = Failure::empty();
    let mut handles: Vec<Handle> = Vec::new();
    while let Some(handle) = heap.put(b"x") {
        handles.push(handle);
    }
    let count = handles.len();

    // Drain from the top so every free retracts the frontier instead of
    // compacting the whole live run.
    for handle in handles.into_iter().rev() {
        let mut buf = [0_u8; 1];
        heap.get(&mut buf, handle);
        if buf != [b'x'] {
            failure |= Failure::DATA_MISMATCH;
        }
    }
    if heap.report().allocated_blocks != 0 {
        failure |= Failure::PLACEMENT;
    }
    (count, failure)
}
