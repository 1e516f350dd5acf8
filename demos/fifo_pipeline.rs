//! Five CPU/GPU pipelines on two CPUs and two GPUs under fixed-priority FIFO.
//!
//! Pass `-v` for per-assignment logging, `-vv` for per-tick work.

use hetsim::workload::TasksetGenerator;
use hetsim::{Affinity, PriorityScheduler, Scheduler, SimConfig, Simulator};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let verbose = std::env::args()
        .skip(1)
        .map(|a| a.matches('v').count())
        .sum::<usize>();
    let llv = match verbose {
        0 => simplelog::LevelFilter::Info,
        1 => simplelog::LevelFilter::Debug,
        _ => simplelog::LevelFilter::Trace,
    };
    let mut lcfg = simplelog::ConfigBuilder::new();
    lcfg.set_time_level(simplelog::LevelFilter::Error)
        .set_location_level(simplelog::LevelFilter::Off)
        .set_target_level(simplelog::LevelFilter::Off)
        .set_thread_level(simplelog::LevelFilter::Off);
    simplelog::TermLogger::init(
        llv,
        lcfg.build(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )?;

    let mut sim = Simulator::with_config(SimConfig {
        time_bound: 120,
        seed: 2025,
    });
    sim.create_processors(Affinity::Cpu, 2);
    sim.create_processors(Affinity::Gpu, 2);
    sim.sort_processors();

    let specs = TasksetGenerator::new(2025).generate(5, 1.6)?;
    for (i, spec) in specs.iter().enumerate() {
        let task = sim.create_pipeline_task(spec)?;
        sim.set_task_priority(task, 99 - i as u8)?;
    }
    println!("utilization {:.2}", sim.utilization());

    let mut sched = PriorityScheduler::default();
    sim.start()?;
    while !sim.is_complete() {
        sched.schedule(&mut sim);
        println!("Current Timestamp: {}", sim.now());
        for processor in sim.processors() {
            println!("  {}", processor);
        }
        for task in sim.tasks() {
            println!("  {}", task);
        }
        sim.advance_tick()?;
        if sim.deadline_missed() {
            println!("Task missed its deadline at tick {}", sim.now());
            break;
        }
    }
    println!(
        "{}: {} ticks, {} units of work",
        sched.name(),
        sim.now(),
        sim.total_executed()
    );
    Ok(())
}
