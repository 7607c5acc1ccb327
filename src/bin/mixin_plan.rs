//! Prints what the transformer would do with every class in a jar.
//!
//! Usage: `mixin_plan JAR_PATH BUNDLES_JSON`

use std::collections::BTreeSet;
use std::env;
use std::fs::File;
use std::io::Read;
use std::time::Instant;

use jvmti_mixin::classfile::ClassFile;
use jvmti_mixin::mixin::registry::BundleRegistry;
use jvmti_mixin::mixin::select::{select, Selection};
use jvmti_mixin::mixin::{BundleSource, JsonBundleFile, Phase};
use zip::ZipArchive;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = env::args().skip(1);
    let (Some(jar_path), Some(bundles_path)) = (args.next(), args.next()) else {
        return Err("usage: mixin_plan JAR_PATH BUNDLES_JSON".into());
    };

    let source = JsonBundleFile::new(&bundles_path);
    let mut registry = BundleRegistry::new();
    for phase in [Phase::PreInit, Phase::Init, Phase::Default] {
        for declaration in source.declarations(phase)? {
            registry.declare(declaration);
        }
    }
    let report = registry.initialize_all();
    for (bundle, err) in &report.failed {
        println!("bundle {bundle} failed: {err}");
    }

    let file = File::open(&jar_path)?;
    let mut zip = ZipArchive::new(file)?;

    let mut seen = BTreeSet::new();
    let (mut classes, mut rewritten, mut malformed) = (0u64, 0u64, 0u64);
    let start = Instant::now();
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let Some(internal) = entry.name().strip_suffix(".class").map(str::to_string) else { continue };
        classes += 1;
        let class = internal.replace('/', ".");

        match select(registry.active(), &class) {
            Selection::Untouched => continue,
            Selection::Forbidden { bundle } => println!("FORBIDDEN    {class} (bundle {bundle})"),
            Selection::PassThrough { bundle } => println!("pass-through {class} (bundle {bundle})"),
            Selection::Apply(mixins) => {
                let mut bytes = Vec::with_capacity(entry.size() as usize);
                entry.read_to_end(&mut bytes)?;
                if ClassFile::parse(&bytes).is_err() {
                    malformed += 1;
                }
                let names: Vec<&str> = mixins.iter().map(|m| m.class_name.as_str()).collect();
                println!("apply        {class} <- {}", names.join(", "));
            }
        }
        rewritten += 1;
        seen.insert(class);
    }
    let dur = start.elapsed();

    let missing: Vec<&str> = registry
        .active()
        .iter()
        .flat_map(|b| b.indexed_targets())
        .filter(|t| !seen.contains(*t))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    println!("jar_path={jar_path}");
    println!("bundles_active={} bundles_failed={}", registry.active().len(), report.failed.len());
    println!("class_files={classes} touched={rewritten} malformed_targets={malformed}");
    println!("targets_not_in_jar={}", missing.len());
    for target in missing {
        println!("  {target}");
    }
    println!("plan_time_ms={:.3}", dur.as_secs_f64() * 1000.0);

    Ok(())
}
