use std::env;
use std::process::ExitCode;

use oaar::network::reader;
use oaar::{BranchAndPrice, BranchAndPriceConfig, Result, Solution};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let Some(path) = args.get(1) else {
        eprintln!("usage: {} <network.oaar>", args.first().map_or("oaar", String::as_str));
        return ExitCode::from(2);
    };
    match run(path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(path: &str) -> Result<()> {
    let network = reader::read_file(path)?;
    let name = network.name().to_string();
    let mut search = BranchAndPrice::new(network, BranchAndPriceConfig::default())?;
    let solution = search.solve()?;
    report(&name, &search, &solution);
    Ok(())
}

fn report(name: &str, search: &BranchAndPrice, solution: &Solution) {
    let network = &search.context().network;
    println!("network:   {}", name);
    println!("status:    {:?}", solution.status);
    println!("objective: {:.3}", solution.objective);
    for route in &solution.routes {
        let flow = network.flow(route.flow);
        let hops: Vec<String> = route
            .links
            .iter()
            .map(|&l| {
                let link = network.link(l);
                format!("{}->{}", link.head, link.tail)
            })
            .collect();
        println!(
            "flow {} ({} -> {}, {}): {} cost {:.3}{}",
            route.flow,
            flow.source,
            flow.destination,
            route.column,
            hops.join(" "),
            route.cost,
            if route.uses_fallback { " [fallback]" } else { "" }
        );
        for &(link, wavelength) in &route.wavelengths {
            println!("    link {} wavelength {}", link, wavelength);
        }
    }
    let stats = &solution.stats;
    println!(
        "nodes {}, columns {}, pricing rounds {}, cutoffs {}, depth {}",
        stats.nodes, stats.columns_generated, stats.cg_iterations, stats.cutoffs, stats.max_depth
    );
}
