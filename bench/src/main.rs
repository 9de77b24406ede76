use bcvm::vm::{Instruction, encode};
use bcvm::{ExecutionResult, ExecutionStats, RuntimeConfig, Value, Vm};
use serde::Serialize;
use std::time::Instant;

#[derive(Serialize)]
struct BenchmarkResult {
    name: String,
    completed: bool,
    bcvm_secs: f64,
    rust_time_secs: f64,
    instructions_per_sec: f64,
    stats: ExecutionStats,
}

#[derive(Serialize)]
struct BenchmarkOutput {
    results: Vec<BenchmarkResult>,
}

// Rust reference implementations

fn rust_sum_loop(n: i64) -> i64 {
    let mut sum: i64 = 0;
    let mut i = n;
    while i != 0 {
        sum = sum.wrapping_add(i);
        i -= 1;
    }
    sum
}

fn rust_fibonacci(n: i64) -> i64 {
    if n < 2 {
        n
    } else {
        rust_fibonacci(n - 1) + rust_fibonacci(n - 2)
    }
}

fn rust_heap_churn(n: i64) {
    for _ in 0..n {
        std::hint::black_box(vec![0i64; 4]);
    }
}

// Workload programs

fn sum_loop_program(n: i64) -> Vec<u8> {
    encode(&[
        Instruction::PushLong(n), // 0
        Instruction::Store(0),    // 9
        Instruction::Push(0),     // 11
        Instruction::Store(1),    // 16
        Instruction::Load(0),     // 18
        Instruction::Jz(47),      // 20
        Instruction::Load(1),     // 25
        Instruction::Load(0),     // 27
        Instruction::Add,         // 29
        Instruction::Store(1),    // 30
        Instruction::Load(0),     // 32
        Instruction::Push(1),     // 34
        Instruction::Sub,         // 39
        Instruction::Store(0),    // 40
        Instruction::Jmp(18),     // 42
        Instruction::Load(1),     // 47
        Instruction::Halt,        // 49
    ])
}

fn fibonacci_program(n: i32) -> Vec<u8> {
    encode(&[
        Instruction::Push(n),                      // 0
        Instruction::Call { target: 12, argc: 1 }, // 5
        Instruction::Halt,                         // 11
        Instruction::Load(0),                      // 12
        Instruction::Push(2),                      // 14
        Instruction::Lt,                           // 19
        Instruction::Jz(29),                       // 20
        Instruction::Load(0),                      // 25
        Instruction::Ret(1),                       // 27
        Instruction::Load(0),                      // 29
        Instruction::Push(1),                      // 31
        Instruction::Sub,                          // 36
        Instruction::Call { target: 12, argc: 1 }, // 37
        Instruction::Load(0),                      // 43
        Instruction::Push(2),                      // 45
        Instruction::Sub,                          // 50
        Instruction::Call { target: 12, argc: 1 }, // 51
        Instruction::Add,                          // 57
        Instruction::Ret(1),                       // 58
    ])
}

fn heap_churn_program(n: i64) -> Vec<u8> {
    encode(&[
        Instruction::PushLong(n), // 0
        Instruction::Store(0),    // 9
        Instruction::Load(0),     // 11
        Instruction::Jz(39),      // 13
        Instruction::New(4),      // 18
        Instruction::Free,        // 23
        Instruction::Load(0),     // 24
        Instruction::Push(1),     // 26
        Instruction::Sub,         // 31
        Instruction::Store(0),    // 32
        Instruction::Jmp(11),     // 34
        Instruction::Halt,        // 39
    ])
}

fn time_rust<F>(f: F) -> f64
where
    F: FnOnce(),
{
    let start = Instant::now();
    f();
    start.elapsed().as_secs_f64()
}

/// Run one workload, checking its result against the Rust reference.
///
/// Returns `None` when the VM cannot be created; such workloads get no row.
fn run_bcvm_benchmark(
    name: &str,
    code: &[u8],
    expected: Option<i64>,
    rust_time_secs: f64,
) -> Option<BenchmarkResult> {
    let config = RuntimeConfig {
        profile_opcodes: true,
        ..RuntimeConfig::default()
    };
    let mut vm = match Vm::new(code, config) {
        Ok(vm) => vm,
        Err(e) => {
            eprintln!("bcvm benchmark {} skipped, vm could not start: {}", name, e);
            return None;
        }
    };

    let start = Instant::now();
    let result = vm.run();
    let elapsed = start.elapsed().as_secs_f64();
    let top = vm.top();

    if let ExecutionResult::Error { error, ip } = &result {
        eprintln!("bcvm benchmark {} failed at {}: {}", name, ip, error);
    }
    if let Some(expected) = expected
        && !matches!(top, Some(Value::Int(n)) if n == expected)
    {
        eprintln!(
            "bcvm benchmark {} produced {:?}, expected {}",
            name, top, expected
        );
    }

    let stats = vm.stats();
    Some(BenchmarkResult {
        name: name.to_string(),
        completed: result.is_completed(),
        bcvm_secs: elapsed,
        rust_time_secs,
        instructions_per_sec: if elapsed > 0.0 {
            stats.instructions as f64 / elapsed
        } else {
            0.0
        },
        stats,
    })
}

fn main() {
    let mut results = Vec::new();

    // sum_loop benchmark
    let n = 5_000_000;
    let mut expected = 0;
    let rust_time = time_rust(|| expected = rust_sum_loop(n));
    results.extend(run_bcvm_benchmark(
        "sum_loop",
        &sum_loop_program(n),
        Some(expected),
        rust_time,
    ));

    // fibonacci benchmark
    let n = 27;
    let mut expected = 0;
    let rust_time = time_rust(|| expected = rust_fibonacci(n as i64));
    results.extend(run_bcvm_benchmark(
        "fibonacci",
        &fibonacci_program(n),
        Some(expected),
        rust_time,
    ));

    // heap churn benchmark
    let n = 1_000_000;
    let rust_time = time_rust(|| rust_heap_churn(n));
    results.extend(run_bcvm_benchmark(
        "heap_churn",
        &heap_churn_program(n),
        None,
        rust_time,
    ));

    let output = BenchmarkOutput { results };
    match serde_json::to_string_pretty(&output) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("failed to serialize results: {}", e),
    }
}
