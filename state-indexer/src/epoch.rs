// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Epoch arithmetic
//!
//! [`EpochMath`] is the pure-function seam used by the derived state cache:
//! layer -> epoch, epoch -> subsidy, and (weight, total weight) -> slots.
//! [`LayerEpochMath`] is the parameterized reference implementation.

use serde::{Deserialize, Serialize};
use spacemesh_state_types::{EpochId, LayerId};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EpochMathError {
    #[error("Slot count {0} does not fit in u32")]
    SlotOverflow(u128),
}

/// Deterministic epoch arithmetic
pub trait EpochMath: Send + Sync {
    fn epoch_of(&self, layer: LayerId) -> EpochId;

    /// Issuance for `epoch`. Must be a pure function of `epoch`.
    fn epoch_subsidy(&self, epoch: EpochId) -> u64;

    /// Number of proposal slots a participant of `weight` gets in `epoch`
    ///
    /// An epoch with no committed weight has no slots.
    fn number_of_slots(
        &self,
        weight: u64,
        total_weight: u64,
        epoch: EpochId,
    ) -> Result<u32, EpochMathError>;
}

/// Network parameters for [`LayerEpochMath`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EpochParams {
    /// Layers in one epoch (mainnet: 4032)
    pub layers_per_epoch: u32,
    /// Eligibility slots per layer (committee size)
    pub slots_per_layer: u32,
    /// First epoch that pays a subsidy; earlier epochs pay nothing
    pub first_reward_epoch: EpochId,
    /// Subsidy paid in `first_reward_epoch`, in the smallest unit
    pub initial_epoch_subsidy: u64,
    /// Epochs after which the subsidy halves
    pub half_life_epochs: u32,
}

impl Default for EpochParams {
    fn default() -> Self {
        Self {
            layers_per_epoch: 4032,
            slots_per_layer: 50,
            first_reward_epoch: 2,
            initial_epoch_subsidy: 1_920_000_000_000_000,
            half_life_epochs: 800,
        }
    }
}

impl EpochParams {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.layers_per_epoch == 0 {
            anyhow::bail!("epoch.layers_per_epoch must be greater than zero");
        }
        if self.slots_per_layer == 0 {
            anyhow::bail!("epoch.slots_per_layer must be greater than zero");
        }
        if self.half_life_epochs == 0 {
            anyhow::bail!("epoch.half_life_epochs must be greater than zero");
        }
        Ok(())
    }
}

/// Fixed-size epochs with an exponentially decaying subsidy
///
/// Parameters are constant across epochs, so the epoch argument of
/// `number_of_slots` does not change the result.
#[derive(Debug, Clone)]
pub struct LayerEpochMath {
    params: EpochParams,
}

impl LayerEpochMath {
    pub fn new(params: EpochParams) -> anyhow::Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &EpochParams {
        &self.params
    }
}

impl EpochMath for LayerEpochMath {
    fn epoch_of(&self, layer: LayerId) -> EpochId {
        let epoch = layer / u64::from(self.params.layers_per_epoch);
        EpochId::try_from(epoch).unwrap_or(EpochId::MAX)
    }

    fn epoch_subsidy(&self, epoch: EpochId) -> u64 {
        if epoch < self.params.first_reward_epoch {
            return 0;
        }
        let elapsed = f64::from(epoch - self.params.first_reward_epoch);
        let decay = 0.5f64.powf(elapsed / f64::from(self.params.half_life_epochs));
        (self.params.initial_epoch_subsidy as f64 * decay) as u64
    }

    fn number_of_slots(
        &self,
        weight: u64,
        total_weight: u64,
        _epoch: EpochId,
    ) -> Result<u32, EpochMathError> {
        if total_weight == 0 {
            return Ok(0);
        }
        let slots = u128::from(weight)
            * u128::from(self.params.slots_per_layer)
            * u128::from(self.params.layers_per_epoch)
            / u128::from(total_weight);
        let slots = u32::try_from(slots).map_err(|_| EpochMathError::SlotOverflow(slots))?;
        Ok(slots.max(1))
    }
}
