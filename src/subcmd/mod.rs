use colored::Colorize;

pub mod show;
pub mod transfer;

fn print_success(job: &str, detail: &str) {
    println!(
        "{}",
        format!(
            r#"
{} successful!
{}"#,
            job, detail
        )
        .green()
    );
}

fn print_failed(job: &str, err: anyhow::Error) {
    println!(
        "{}",
        format!(
            r#"
{} failed!

{:#}
"#,
            job, err
        )
        .red()
    );
}

/// Prints the outcome of `job`. Returns whether it succeeded.
fn report(job: &str, result: anyhow::Result<String>) -> bool {
    match result {
        Ok(detail) => {
            print_success(job, &detail);
            true
        }
        Err(err) => {
            print_failed(job, err);
            false
        }
    }
}
