use log::info;

use crate::{
    model::{attrs::Attrs, input::PijulInput},
    Pijulfetch,
};

/// Handler for the resolve command: materializes the reference and prints
/// the resulting store path.
pub fn do_resolve(
    pijulfetch: &Pijulfetch,
    url: &str,
    channel: Option<&str>,
    state: Option<&str>,
    name: Option<&str>,
) -> anyhow::Result<()> {
    let input = build_input(pijulfetch, url, channel, state)?;
    let resolution = pijulfetch.resolve(&input, name)?;

    info!("resolved {} to {}", input, resolution.input);
    println!("{}", resolution.handle.path.display());

    Ok(())
}

/// Handler for the lock command: materializes the reference and prints a
/// fully pinned URL that will always resolve to the same snapshot.
pub fn do_lock(
    pijulfetch: &Pijulfetch,
    url: &str,
    channel: Option<&str>,
    state: Option<&str>,
    name: Option<&str>,
) -> anyhow::Result<()> {
    let input = build_input(pijulfetch, url, channel, state)?;
    let resolution = pijulfetch.resolve(&input, name)?;

    println!("{}", pijulfetch.to_url(&resolution.input)?);

    Ok(())
}

pub fn do_clear_cache(pijulfetch: &Pijulfetch) -> anyhow::Result<()> {
    pijulfetch.clear_cache()
}

/// Combines the URL with the pin flags; a flag that contradicts a pin
/// already in the URL's query string is refused rather than silently
/// preferred.
fn build_input(
    pijulfetch: &Pijulfetch,
    url: &str,
    channel: Option<&str>,
    state: Option<&str>,
) -> anyhow::Result<PijulInput> {
    let input = pijulfetch.input_from_url(url)?;

    let mut pins = Attrs::new();
    if let Some(channel) = channel {
        pins.insert("channel", channel);
    }
    if let Some(state) = state {
        pins.insert("state", state);
    }

    Ok(input.enriched(&pins)?)
}
