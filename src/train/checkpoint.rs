//! Per-epoch parameter checkpoints (safetensors).
//!
//! Layout: `{root}/params_{run_name}/Param_epoch_{epoch}.safetensors`.
//! Writes are synchronous and not atomic; a crash mid-write only affects
//! that epoch's file.

use std::path::{Path, PathBuf};

use candle_nn::VarMap;

use crate::Result;

pub fn checkpoint_dir(root: impl AsRef<Path>, run_name: &str) -> PathBuf {
    root.as_ref().join(format!("params_{run_name}"))
}

pub fn checkpoint_path(root: impl AsRef<Path>, run_name: &str, epoch: usize) -> PathBuf {
    checkpoint_dir(root, run_name).join(format!("Param_epoch_{epoch}.safetensors"))
}

/// Save every variable of `varmap` as the state at the end of `epoch`.
pub fn save_checkpoint(
    varmap: &VarMap,
    root: impl AsRef<Path>,
    run_name: &str,
    epoch: usize,
) -> Result<PathBuf> {
    let path = checkpoint_path(root, run_name, epoch);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    varmap.save(&path)?;
    tracing::info!(epoch, path = %path.display(), "saved checkpoint");
    Ok(path)
}

/// Overwrite the variables of `varmap` with a saved checkpoint.
///
/// `varmap` must already hold every variable (build the model first).
pub fn load_checkpoint(varmap: &mut VarMap, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    varmap.load(path)?;
    tracing::info!(path = %path.display(), "loaded checkpoint");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::{Init, VarBuilder};

    #[test]
    fn path_follows_run_and_epoch() {
        assert_eq!(
            checkpoint_path("./Train_record", "clotho_run", 7),
            PathBuf::from("./Train_record/params_clotho_run/Param_epoch_7.safetensors")
        );
    }

    #[test]
    fn save_then_load_restores_values() {
        let dir = tempfile::tempdir().unwrap();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let w = vb.get_with_hints((2, 2), "w", Init::Const(0.5)).unwrap();
        let path = save_checkpoint(&varmap, dir.path(), "run", 0).unwrap();
        assert!(path.exists());

        let mut restored = VarMap::new();
        let vb = VarBuilder::from_varmap(&restored, DType::F32, &Device::Cpu);
        let w2 = vb.get_with_hints((2, 2), "w", Init::Const(0.0)).unwrap();
        load_checkpoint(&mut restored, &path).unwrap();

        let diff: f32 = (w - w2.clone())
            .unwrap()
            .abs()
            .unwrap()
            .sum_all()
            .unwrap()
            .to_scalar()
            .unwrap();
        assert_eq!(diff, 0.0);
        let values: Vec<Vec<f32>> = w2.to_vec2().unwrap();
        assert_eq!(values, vec![vec![0.5, 0.5], vec![0.5, 0.5]]);
    }

    #[test]
    fn loading_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut varmap = VarMap::new();
        assert!(load_checkpoint(&mut varmap, dir.path().join("nope.safetensors")).is_err());
    }

    #[test]
    fn each_epoch_gets_its_own_file() {
        let dir = tempfile::tempdir().unwrap();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let _ = vb.get_with_hints(4, "b", Init::Const(1.0)).unwrap();
        for epoch in 0..3 {
            save_checkpoint(&varmap, dir.path(), "r", epoch).unwrap();
        }
        let count = std::fs::read_dir(checkpoint_dir(dir.path(), "r")).unwrap().count();
        assert_eq!(count, 3);
    }
}
