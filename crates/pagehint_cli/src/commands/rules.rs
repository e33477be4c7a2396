//! Rules command implementation

use miette::Result;

use pagehint_plugin::RuleMeta;

/// One row of the rule listing.
pub fn describe(name: &str, meta: &RuleMeta) -> String {
    let recommended = if meta.recommended { "recommended" } else { "" };
    let line = format!("{:<32} {:<18} {}", name, meta.category.as_str(), recommended);
    line.trim_end().to_string()
}

pub fn run_rules() -> Result<()> {
    let package = pagehint_builtin::package();

    for (name, factory) in package.rules() {
        let meta = factory.meta();
        println!("{}", describe(name, &meta));
        if let Some(description) = &meta.description {
            println!("    {}", description);
        }
    }

    Ok(())
}
