use crate::config::ForecastConfig;
use crate::models::dlinear::{self, DLinear};
use anyhow::Result;
use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::info;

pub const CHECKPOINT_DIR: &str = "checkpoints";

/// Location of the best checkpoint for a given model id.
pub fn checkpoint_path(model_id: u64) -> PathBuf {
    crate::config::project_file_path(CHECKPOINT_DIR)
        .join(format!("model_{}.safetensors", model_id))
}

/// Persists the current weights as a safetensors checkpoint.
pub fn save_checkpoint(varmap: &VarMap, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    varmap.save(path)?;
    info!("Saved safetensors checkpoint: {}", path.display());
    Ok(())
}

/// Checks that a checkpoint exists and carries every tensor the forecaster
/// expects, before any weight is consumed.
pub fn validate_checkpoint(path: &Path) -> Result<()> {
    if !path.is_file() {
        anyhow::bail!("checkpoint not found: {}", path.display());
    }

    let buffer = std::fs::read(path)?;
    let tensors = safetensors::SafeTensors::deserialize(&buffer)?;
    let present: HashSet<String> = tensors.names().iter().map(|n| n.to_string()).collect();

    let missing: Vec<String> = dlinear::tensor_names()
        .into_iter()
        .filter(|name| !present.contains(name))
        .collect();

    if !missing.is_empty() {
        anyhow::bail!(
            "checkpoint {} is missing expected tensors: {}",
            path.display(),
            missing.join(", ")
        );
    }

    Ok(())
}

/// Loads the forecaster from a validated checkpoint.
pub fn load_model(path: &Path, cfg: &ForecastConfig, device: &Device) -> Result<DLinear> {
    validate_checkpoint(path)?;

    let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[path], DType::F32, device)? };
    let model = DLinear::new(
        cfg.seq_len,
        cfg.pred_len,
        cfg.moving_avg,
        vb.pp(dlinear::VAR_PREFIX),
    )?;
    info!("Model loaded from checkpoint {}", path.display());
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_checkpoint(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("tempocast_{}_{}.safetensors", name, std::process::id()))
    }

    fn small_config() -> ForecastConfig {
        let mut cfg = ForecastConfig::new(2);
        cfg.seq_len = 8;
        cfg.pred_len = 4;
        cfg.moving_avg = 3;
        cfg
    }

    #[test]
    fn test_save_validate_load_roundtrip() {
        let cfg = small_config();
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let _ = DLinear::new(
            cfg.seq_len,
            cfg.pred_len,
            cfg.moving_avg,
            vb.pp(dlinear::VAR_PREFIX),
        )
        .unwrap();

        let path = temp_checkpoint("roundtrip");
        save_checkpoint(&varmap, &path).unwrap();
        validate_checkpoint(&path).unwrap();
        let model = load_model(&path, &cfg, &device).unwrap();
        assert_eq!(model.pred_len(), cfg.pred_len);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_missing_checkpoint_rejected() {
        let path = temp_checkpoint("does_not_exist");
        let _ = std::fs::remove_file(&path);
        assert!(validate_checkpoint(&path).is_err());
    }

    #[test]
    fn test_wrong_tensor_keys_rejected() {
        let cfg = small_config();
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        // Register under a prefix the forecaster does not expect.
        let _ = DLinear::new(cfg.seq_len, cfg.pred_len, cfg.moving_avg, vb.pp("other")).unwrap();

        let path = temp_checkpoint("wrong_keys");
        save_checkpoint(&varmap, &path).unwrap();
        assert!(validate_checkpoint(&path).is_err());

        let _ = std::fs::remove_file(&path);
    }
}
