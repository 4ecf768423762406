//! Epoch-triggered parameter freezing.
//!
//! A schedule is an ordered list of `(epoch, action)` pairs. After training
//! epoch `e` completes, every entry with `epoch == e` fires once. Actions
//! only ever freeze; nothing is unfrozen later in the run.

use crate::config::DatasetKind;
use crate::model::CaptionModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreezeAction {
    /// Disable gradients for every audio encoder parameter.
    FreezeAudioEncoder,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FreezeSchedule {
    entries: Vec<(usize, FreezeAction)>,
}

impl FreezeSchedule {
    pub fn new(mut entries: Vec<(usize, FreezeAction)>) -> Self {
        entries.sort_by_key(|(epoch, _)| *epoch);
        Self { entries }
    }

    /// Freeze the audio encoder after the dataset's freeze epoch.
    pub fn for_dataset(kind: DatasetKind) -> Self {
        Self::new(vec![(
            kind.encoder_freeze_epoch(),
            FreezeAction::FreezeAudioEncoder,
        )])
    }

    pub fn entries(&self) -> &[(usize, FreezeAction)] {
        &self.entries
    }

    /// Actions scheduled for the boundary after `epoch`.
    pub fn due(&self, epoch: usize) -> impl Iterator<Item = FreezeAction> + '_ {
        self.entries
            .iter()
            .filter(move |(at, _)| *at == epoch)
            .map(|(_, action)| *action)
    }

    /// Apply the actions due after `epoch` to `model` and return them.
    pub fn apply<M: CaptionModel + ?Sized>(&self, epoch: usize, model: &mut M) -> Vec<FreezeAction> {
        let actions: Vec<FreezeAction> = self.due(epoch).collect();
        for action in &actions {
            match action {
                FreezeAction::FreezeAudioEncoder => {
                    model.set_audio_encoder_frozen(true);
                    tracing::info!(epoch, "audio encoder frozen");
                }
            }
        }
        actions
    }
}
