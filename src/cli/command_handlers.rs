use std::{error::Error, path::Path, sync::Arc};

use log::warn;

use crate::{
    flock::FileLock,
    git::{mirror::MirrorStore, GitCli},
    processor::{Processor, UpdateConfig},
};

/// Handler to update-submodules command
/// Holds the mirror store lock for the whole run and stops the pipeline on
/// Ctrl-C.
pub fn do_update_submodules(config: UpdateConfig) -> Result<(), Box<dyn Error>> {
    let processor = Processor::new(config, Arc::new(GitCli::default()))?;
    let store = MirrorStore::new(&processor.config().mirror_base_dir);
    let _lock = FileLock::acquire(store.location())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        let cancel = processor.cancellation_token();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, stopping all git commands");
                cancel.cancel();
            }
        });
        processor.run().await
    })?;

    Ok(())
}

/// Handler to clear-mirrors command
pub fn do_clear_mirrors(mirror_directory: &Path) -> Result<(), Box<dyn Error>> {
    let store = MirrorStore::new(mirror_directory);
    let _lock = FileLock::acquire(store.location())?;
    store.clear()?;
    Ok(())
}
